//! Free-text command classifier.
//!
//! Pure, total, and deterministic: every input maps to exactly one intent
//! and nothing here ever fails. Ordered rules, first match wins; anything
//! unrecognized falls through to READ because answering with state is the
//! only safe default. HELP is matched before the action rules so a user
//! cannot mutate the cluster by asking `help me scale`.

use std::sync::LazyLock;

use regex::Regex;

use super::{CommandAction, CommandKind, ParsedCommand};

static SCALE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"scale\b.*?\bto\s+(\d+)").expect("scale pattern is valid")
});

/// Classify free text into a command.
#[must_use]
pub fn classify(input: &str) -> ParsedCommand {
    let raw_text = input.trim().to_string();
    let text = raw_text.to_lowercase();

    let kind = if is_help(&text) {
        CommandKind::Help
    } else if let Some(remainder) = dry_run_remainder(&text) {
        CommandKind::DryRun(parse_action(remainder))
    } else if let Some(action) = parse_action(&text) {
        CommandKind::Execute(action)
    } else {
        CommandKind::Read
    };

    ParsedCommand { kind, raw_text }
}

/// Rule 1: the text equals `help` or contains `help` as a word.
fn is_help(text: &str) -> bool {
    text == "help"
        || text
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| c.is_ascii_punctuation()))
            .any(|word| word == "help")
}

/// Rule 2: leading `dry run ` or a simulation phrase anywhere. Returns the
/// text the action rules should run against.
fn dry_run_remainder(text: &str) -> Option<&str> {
    if let Some(rest) = text.strip_prefix("dry run ") {
        return Some(rest);
    }
    if text == "dry run" {
        return Some("");
    }
    if ["what happens", "what if", "simulate"]
        .iter()
        .any(|phrase| text.contains(phrase))
    {
        return Some(text);
    }
    None
}

/// Rules 3 and 4: `scale … to <N>`, then `restart`.
fn parse_action(text: &str) -> Option<CommandAction> {
    if text.contains("scale") {
        if let Some(captures) = SCALE_TARGET.captures(text) {
            // Overlong digit runs overflow i64; treat them as no match so
            // the input degrades to the fail-safe READ path.
            if let Ok(replicas) = captures[1].parse::<i64>() {
                return Some(CommandAction::Scale { replicas });
            }
        }
    }
    if text.contains("restart") {
        return Some(CommandAction::Restart);
    }
    None
}
