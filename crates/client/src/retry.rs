//! Retry bounds and token classification for credential refresh

use hopwire_core::CredentialError;

use crate::contract::ActivationError;

/// Fixed attempt counters for the refresh state machine. Exceeding a bound is
/// a terminal failure, never a longer wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Outer "mint a credential" cycles
    pub max_mint_attempts: usize,
    /// Reads of the token set per cycle, with a bundle import between reads
    pub max_token_reads: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_mint_attempts: 3,
            max_token_reads: 3,
        }
    }
}

/// What happens to a proof token after an exchange attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerdict {
    /// Rejected as invalid or already spent; removed
    Poisoned,
    /// Failed for another reason; kept for a later attempt
    Retained,
}

impl TokenVerdict {
    pub fn of_failure(err: &ActivationError) -> Self {
        match err {
            ActivationError::Poisoned(_) => Self::Poisoned,
            ActivationError::Failed(_) => Self::Retained,
        }
    }

    pub fn keeps_token(&self) -> bool {
        matches!(self, Self::Retained)
    }
}

impl RetryPolicy {
    /// Whether a failed bundle import must abort the refresh instead of
    /// being logged and retried on the next read.
    pub fn import_is_fatal(&self, err: &CredentialError) -> bool {
        matches!(
            err,
            CredentialError::ContractMismatch { .. }
                | CredentialError::ContractKeyMismatch { .. }
                | CredentialError::MalformedBundle(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopwire_core::PublicKey;

    #[test]
    fn test_default_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_mint_attempts, 3);
        assert_eq!(policy.max_token_reads, 3);
    }

    #[test]
    fn test_only_retained_tokens_survive() {
        let poisoned = TokenVerdict::of_failure(&ActivationError::Poisoned("spent".into()));
        let failed = TokenVerdict::of_failure(&ActivationError::Failed("timeout".into()));
        assert_eq!(poisoned, TokenVerdict::Poisoned);
        assert!(!poisoned.keeps_token());
        assert!(failed.keeps_token());
    }

    #[test]
    fn test_fatal_import_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.import_is_fatal(&CredentialError::ContractKeyMismatch {
            expected: PublicKey([1; 32]),
            live: PublicKey([2; 32]),
        }));
        assert!(policy.import_is_fatal(&CredentialError::MalformedBundle("x".into())));
        assert!(!policy.import_is_fatal(&CredentialError::BundleUnavailable("404".into())));
        assert!(!policy.import_is_fatal(&CredentialError::ContractUnavailable("down".into())));
    }
}
