//! CipherChat CLI - command line access to the key store and secure channel
//!
//! This crate provides a non-interactive command-line interface for:
//! - Generating, listing, exporting and deleting identities
//! - Importing other users' public keys
//! - Sealing and opening envelopes
//! - Creating and accepting signed key introductions

pub mod cli;
pub mod config;
pub mod output;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use cipherchat_core::CoreError;

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Authentication failed - the envelope or introduction did not verify
/// - 3: Rejected - stale, replayed, or addressed to another identity
/// - 4: Invalid input - bad arguments, handles, keys or files
/// - 5: Key not found - an identity or imported key is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Authentication failed (exit code 2)
    AuthenticationFailed = 2,
    /// Message rejected (exit code 3)
    Rejected = 3,
    /// Invalid input provided (exit code 4)
    InvalidInput = 4,
    /// Required key missing (exit code 5)
    KeyNotFound = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&CoreError> for ExitCode {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::SignatureInvalid
            | CoreError::DecryptionFailed
            | CoreError::UnknownSender(_)
            | CoreError::FingerprintMismatch { .. } => ExitCode::AuthenticationFailed,
            CoreError::StaleMessage { .. }
            | CoreError::Replayed
            | CoreError::WrongRecipient { .. } => ExitCode::Rejected,
            CoreError::InvalidHandle(_)
            | CoreError::InvalidKeyFormat
            | CoreError::MalformedEnvelope(_)
            | CoreError::UnsupportedAlgorithm(_)
            | CoreError::MessageTooLarge { .. }
            | CoreError::IdentityExists(_)
            | CoreError::Config(_) => ExitCode::InvalidInput,
            CoreError::KeyNotFound(_)
            | CoreError::RecipientKeyMissing(_)
            | CoreError::SenderKeyMissing(_) => ExitCode::KeyNotFound,
            CoreError::KeyGenerationFailed | CoreError::Storage(_) | CoreError::Crypto(_) => {
                ExitCode::GeneralError
            }
        }
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Pick the exit code for a failed command.
    pub fn for_error(err: &anyhow::Error) -> Self {
        if let Some(core) = err.downcast_ref::<CoreError>() {
            return core.into();
        }
        if err.downcast_ref::<config::ConfigError>().is_some() {
            return ExitCode::InvalidInput;
        }
        ExitCode::GeneralError
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::AuthenticationFailed => "AUTH_FAILED",
            ExitCode::Rejected => "REJECTED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::KeyNotFound => "KEY_NOT_FOUND",
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::AuthenticationFailed as i32, 2);
        assert_eq!(ExitCode::Rejected as i32, 3);
        assert_eq!(ExitCode::InvalidInput as i32, 4);
        assert_eq!(ExitCode::KeyNotFound as i32, 5);
        assert_eq!(i32::from(ExitCode::Rejected), 3);
    }

    #[test]
    fn test_core_errors_map_to_codes() {
        assert_eq!(
            ExitCode::from(&CoreError::SignatureInvalid),
            ExitCode::AuthenticationFailed
        );
        assert_eq!(
            ExitCode::from(&CoreError::DecryptionFailed),
            ExitCode::AuthenticationFailed
        );
        assert_eq!(ExitCode::from(&CoreError::Replayed), ExitCode::Rejected);
        assert_eq!(
            ExitCode::from(&CoreError::StaleMessage { timestamp: 0, now: 10_000 }),
            ExitCode::Rejected
        );
        assert_eq!(
            ExitCode::from(&CoreError::InvalidHandle("x".into())),
            ExitCode::InvalidInput
        );
        assert_eq!(
            ExitCode::from(&CoreError::RecipientKeyMissing("bob".into())),
            ExitCode::KeyNotFound
        );
        assert_eq!(
            ExitCode::from(&CoreError::Storage("write x".into())),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_for_error_downcasts() {
        let err = anyhow::Error::new(CoreError::KeyNotFound("alice".into()));
        assert_eq!(ExitCode::for_error(&err), ExitCode::KeyNotFound);

        let err = anyhow::Error::new(CoreError::SignatureInvalid).context("opening envelope");
        assert_eq!(ExitCode::for_error(&err), ExitCode::AuthenticationFailed);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::Success.name(), "SUCCESS");
        assert_eq!(ExitCode::AuthenticationFailed.name(), "AUTH_FAILED");
        assert_eq!(ExitCode::KeyNotFound.name(), "KEY_NOT_FOUND");
        let _ = ExitCode::Success.to_exit_code();
    }
}
