//! Session outcome reconciliation.
//!
//! At disconnect the gateway reports back to the telephony platform through
//! output variables: how the call ended, why, what was said, and what it
//! cost in tokens. The outcome is built from whichever termination path won:
//! a call-control tool, a vendor failure, or the caller hanging up.

use std::collections::HashMap;
use std::time::Duration;

use crate::core::realtime::{TranscriptRole, UsageReport};

/// One final transcript line.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
}

/// Accumulated token usage across all turns of a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageCounters {
    pub input_text_tokens: u64,
    pub input_audio_tokens: u64,
    pub input_cached_text_tokens: u64,
    pub input_cached_audio_tokens: u64,
    pub output_text_tokens: u64,
    pub output_audio_tokens: u64,
}

impl UsageCounters {
    /// Fold one per-turn report into the session totals.
    pub fn add(&mut self, report: &UsageReport) {
        self.input_text_tokens += report.input_text_tokens;
        self.input_audio_tokens += report.input_audio_tokens;
        self.input_cached_text_tokens += report.input_cached_text_tokens;
        self.input_cached_audio_tokens += report.input_cached_audio_tokens;
        self.output_text_tokens += report.output_text_tokens;
        self.output_audio_tokens += report.output_audio_tokens;
    }
}

/// How the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The model ended the call with the request resolved.
    Success { summary: String },
    /// The model handed the caller to a human.
    Escalation {
        reason: String,
        department: Option<String>,
    },
    /// The vendor leg failed and could not be recovered.
    Error { message: String },
    /// The caller or the platform closed the call first.
    ClientDisconnect,
}

impl TerminationOutcome {
    fn label(&self) -> &'static str {
        match self {
            TerminationOutcome::Success { .. } => "SUCCESS",
            TerminationOutcome::Escalation { .. } => "ESCALATION",
            TerminationOutcome::Error { .. } => "ERROR",
            TerminationOutcome::ClientDisconnect => "CLIENT_DISCONNECT",
        }
    }

    /// Whether the platform should route the caller to a human queue.
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            TerminationOutcome::Escalation { .. } | TerminationOutcome::Error { .. }
        )
    }
}

/// The reconciled outcome reported at disconnect.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub termination: TerminationOutcome,
    pub usage: UsageCounters,
    pub transcript: Vec<TranscriptEntry>,
    pub duration: Duration,
}

impl SessionOutcome {
    /// Output variables for the disconnect message. String-valued, as the
    /// telephony platform requires.
    pub fn output_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("CALL_OUTCOME".to_string(), self.termination.label().to_string());
        vars.insert(
            "ESCALATION".to_string(),
            self.termination.is_escalation().to_string(),
        );

        match &self.termination {
            TerminationOutcome::Success { summary } => {
                vars.insert("SUMMARY".to_string(), summary.clone());
            }
            TerminationOutcome::Escalation { reason, department } => {
                vars.insert("ESCALATION_REASON".to_string(), reason.clone());
                if let Some(department) = department {
                    vars.insert("ESCALATION_DEPARTMENT".to_string(), department.clone());
                }
            }
            TerminationOutcome::Error { message } => {
                vars.insert("ESCALATION_REASON".to_string(), message.clone());
            }
            TerminationOutcome::ClientDisconnect => {}
        }

        vars.insert(
            "CONVERSATION_SUMMARY".to_string(),
            self.conversation_summary(),
        );
        vars.insert(
            "CONVERSATION_DURATION".to_string(),
            self.duration.as_secs().to_string(),
        );
        vars.insert(
            "TRANSCRIPT".to_string(),
            self.transcript
                .iter()
                .map(|entry| format!("{}: {}", entry.role, entry.text))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        vars.insert(
            "TOTAL_INPUT_TEXT_TOKENS".to_string(),
            self.usage.input_text_tokens.to_string(),
        );
        vars.insert(
            "TOTAL_INPUT_AUDIO_TOKENS".to_string(),
            self.usage.input_audio_tokens.to_string(),
        );
        vars.insert(
            "TOTAL_INPUT_CACHED_TEXT_TOKENS".to_string(),
            self.usage.input_cached_text_tokens.to_string(),
        );
        vars.insert(
            "TOTAL_INPUT_CACHED_AUDIO_TOKENS".to_string(),
            self.usage.input_cached_audio_tokens.to_string(),
        );
        vars.insert(
            "TOTAL_OUTPUT_TEXT_TOKENS".to_string(),
            self.usage.output_text_tokens.to_string(),
        );
        vars.insert(
            "TOTAL_OUTPUT_AUDIO_TOKENS".to_string(),
            self.usage.output_audio_tokens.to_string(),
        );

        vars
    }

    /// One-line account of the conversation. Prefers the model's own closing
    /// summary; otherwise digests the transcript so the platform always gets
    /// something, even when the caller hung up first.
    fn conversation_summary(&self) -> String {
        match &self.termination {
            TerminationOutcome::Success { summary } if !summary.is_empty() => summary.clone(),
            TerminationOutcome::Escalation { reason, .. } => {
                format!("Escalated to a human agent: {reason}")
            }
            _ => self.transcript_digest(),
        }
    }

    fn transcript_digest(&self) -> String {
        let first_user = self
            .transcript
            .iter()
            .find(|e| e.role == TranscriptRole::User);
        let last_assistant = self
            .transcript
            .iter()
            .rev()
            .find(|e| e.role == TranscriptRole::Assistant);
        match (first_user, last_assistant) {
            (Some(user), Some(agent)) => {
                format!("Caller: {} / Agent: {}", user.text, agent.text)
            }
            (Some(user), None) => format!("Caller: {}", user.text),
            (None, Some(agent)) => format!("Agent: {}", agent.text),
            (None, None) => String::new(),
        }
    }
}
