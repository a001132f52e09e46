//! Classification of connection failures

use crate::Error;

/// Close codes that mean the endpoint rejected credentials or setup
const AUTH_CLOSE_CODES: &[u16] = &[1007, 1008];

/// How the controller should react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected close; do not reconnect
    Normal,
    /// Network blip or server hiccup; retry with backoff
    Transient,
    /// Selected model is not served; advance to the next candidate
    ModelUnavailable,
    /// Setup was rejected as malformed; retry once with a minimal setup
    InvalidConfig,
    /// Credentials rejected; never retry
    Auth,
}

/// Classify a close event
#[must_use]
pub fn classify_close(code: u16, reason: &str) -> FailureKind {
    if let Some(kind) = classify_text(reason) {
        return kind;
    }
    if AUTH_CLOSE_CODES.contains(&code) {
        return FailureKind::Auth;
    }
    match code {
        1000 | 1001 => FailureKind::Normal,
        _ => FailureKind::Transient,
    }
}

/// Classify a failed connect or send
#[must_use]
pub fn classify_error(error: &Error) -> FailureKind {
    match error {
        Error::Auth(_) => FailureKind::Auth,
        Error::ModelUnavailable(_) => FailureKind::ModelUnavailable,
        other => classify_text(&other.to_string()).unwrap_or(FailureKind::Transient),
    }
}

fn classify_text(text: &str) -> Option<FailureKind> {
    let lower = text.to_lowercase();
    if lower.contains("not found") || lower.contains("not supported") {
        Some(FailureKind::ModelUnavailable)
    } else if lower.contains("invalid argument") {
        Some(FailureKind::InvalidConfig)
    } else if lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("unauthenticated")
        || lower.contains("permission denied")
        || lower.contains("unauthorized")
    {
        Some(FailureKind::Auth)
    } else {
        None
    }
}

/// Human-readable meaning of a WebSocket close code
#[must_use]
pub const fn describe_close_code(code: u16) -> &'static str {
    match code {
        1000 => "normal closure",
        1001 => "endpoint going away",
        1005 => "no status code received",
        1006 => "abnormal closure without a close frame (network drop)",
        1007 => "invalid payload (often a rejected API key or malformed setup)",
        1008 => "policy violation (credentials, quota or model access)",
        1011 => "internal server error",
        1013 => "try again later",
        _ => "unrecognized close code",
    }
}

/// Message shown to the user when the session cannot continue
#[must_use]
pub fn actionable_message(kind: FailureKind, detail: &str) -> String {
    match kind {
        FailureKind::Auth => format!(
            "The live endpoint rejected the credentials ({detail}). \
             Check GEMINI_API_KEY or try an alternate model with SNUGGLES_MODEL."
        ),
        FailureKind::ModelUnavailable => format!(
            "None of the configured live models are available ({detail}). \
             Update session.models or set SNUGGLES_MODEL."
        ),
        FailureKind::InvalidConfig => format!(
            "The session setup was rejected even in minimal form ({detail}). \
             Check the persona prompt and session settings."
        ),
        FailureKind::Normal | FailureKind::Transient => {
            format!("Connection lost and could not be restored ({detail}).")
        }
    }
}
