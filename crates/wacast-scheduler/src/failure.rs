//! Send-failure classification: permanent vs transient.
//!
//! Permanent failures are recipient/account conditions a retry cannot fix;
//! the contact is marked `failed` and never retried. Everything else is
//! transient and reverts the contact to `pending` for another attempt.

/// Outcome class of a failed send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Will not resolve on retry: mark `failed`, keep the error text.
    Permanent,
    /// May resolve on retry: revert to `pending`.
    Transient,
}

/// Error-text patterns that identify a permanent failure.
const PERMANENT_PATTERNS: &[&str] = &[
    "banned",
    "blocked",
    "restricted",
    "not registered",
    "not on whatsapp",
    "invalid number",
    "invalid phone",
    "malformed",
    "privacy settings",
];

/// Patterns that indicate the sending account itself is unusable. On top of
/// failing the contact, the account is forced disconnected so workers of
/// every campaign stop using it.
const ACCOUNT_DISABLING_PATTERNS: &[&str] = &["banned", "restricted"];

/// Classify a transport error by its message text.
pub fn classify(error_text: &str) -> FailureKind {
    let lower = error_text.to_lowercase();
    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::Permanent
    } else {
        FailureKind::Transient
    }
}

/// Does this error take the sending account out of rotation?
pub fn disables_account(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    ACCOUNT_DISABLING_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_patterns() {
        for msg in [
            "Account banned by provider",
            "recipient has blocked you",
            "this account is restricted",
            "number not registered on network",
            "131026: number not on whatsapp",
            "Invalid number format",
            "malformed destination",
            "cannot message due to privacy settings",
        ] {
            assert_eq!(classify(msg), FailureKind::Permanent, "{msg}");
        }
    }

    #[test]
    fn test_transient_patterns() {
        for msg in [
            "timeout waiting for ack",
            "session not ready",
            "connection reset by peer",
            "temporary network hiccup",
            "rate limit hit, slow down",
        ] {
            assert_eq!(classify(msg), FailureKind::Transient, "{msg}");
        }
    }

    #[test]
    fn test_account_disabling() {
        assert!(disables_account("account banned"));
        assert!(disables_account("Account Restricted"));
        assert!(!disables_account("recipient has blocked you"));
        assert!(!disables_account("timeout"));
    }
}
