//! Bearer-token verification and identity resolution.
//!
//! The auth provider mints tokens of the form `<hex(claims)>.<hex(sig)>`
//! where `claims` is a JSON document carrying the subject and tier claim
//! and `sig` is an HMAC-SHA256 over the claims bytes with the shared
//! signing secret. Verification never trusts anything else in the request:
//! role fields in the body are ignored and the tier is re-derived from the
//! verified claim on every call.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Tier claim carried by a provider-verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleClaim {
    Admin,
    Free,
    Normal,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    /// Opaque provider-assigned user id.
    sub: String,
    /// Tier claim assigned by the provider.
    role: RoleClaim,
}

/// Verified caller identity. Derived per request, never persisted.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub role_claim: RoleClaim,
}

/// Verifies provider-minted bearer tokens.
#[derive(Clone)]
pub struct AuthVerifier {
    signing_secret: String,
}

impl AuthVerifier {
    #[must_use]
    pub fn new(signing_secret: String) -> Self {
        Self { signing_secret }
    }

    /// Verify a bearer token and extract the caller identity.
    pub fn verify(&self, token: &str) -> Result<VerifiedIdentity, ServiceError> {
        let (claims_hex, signature_hex) = token
            .split_once('.')
            .ok_or_else(|| ServiceError::Unauthorized("malformed token".to_string()))?;

        let claims_bytes = hex::decode(claims_hex)
            .map_err(|_| ServiceError::Unauthorized("malformed token".to_string()))?;
        let signature = hex::decode(signature_hex)
            .map_err(|_| ServiceError::Unauthorized("malformed token".to_string()))?;

        if !self.signature_matches(&claims_bytes, &signature) {
            return Err(ServiceError::Unauthorized(
                "token signature mismatch".to_string(),
            ));
        }

        let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| ServiceError::Unauthorized("malformed token claims".to_string()))?;

        Ok(VerifiedIdentity {
            user_id: claims.sub,
            role_claim: claims.role,
        })
    }

    fn signature_matches(&self, claims: &[u8], signature: &[u8]) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(self.signing_secret.as_bytes()) else {
            return false;
        };
        mac.update(claims);
        let computed = mac.finalize().into_bytes();

        // Constant-time comparison to prevent timing attacks
        computed.as_slice().ct_eq(signature).into()
    }
}

/// Mint a token the way the provider does. Test support.
#[cfg(test)]
#[must_use]
pub fn mint_token(secret: &str, user_id: &str, role: &str) -> String {
    let claims = serde_json::json!({ "sub": user_id, "role": role }).to_string();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(claims.as_bytes());
    let signature = mac.finalize().into_bytes();
    format!("{}.{}", hex::encode(claims), hex::encode(signature))
}
