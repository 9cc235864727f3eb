//! Chat command domain: classified intents and their payloads.

pub mod help;
pub mod parser;

pub use parser::classify;

/// Mutating action requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Set the deployment's replica count. Bounds are enforced downstream,
    /// not at parse time.
    Scale { replicas: i64 },
    /// Rolling restart of the deployment.
    Restart,
}

impl CommandAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scale { .. } => "scale",
            Self::Restart => "restart",
        }
    }

    /// Requested replica count, when the action carries one.
    #[must_use]
    pub fn requested_replicas(&self) -> Option<i64> {
        match self {
            Self::Scale { replicas } => Some(*replicas),
            Self::Restart => None,
        }
    }
}

/// Classified user intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Help,
    Read,
    /// Preview of what an action would do; never mutates. The action is
    /// absent when the remainder of the text matched no action rule.
    DryRun(Option<CommandAction>),
    Execute(CommandAction),
}

impl CommandKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "HELP",
            Self::Read => "READ",
            Self::DryRun(_) => "DRY_RUN",
            Self::Execute(_) => "EXECUTE",
        }
    }
}

/// A classified command together with the text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    pub raw_text: String,
}
