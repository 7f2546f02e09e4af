//! Time-based one-time password generation

use super::AuthError;
use chrono::{DateTime, Utc};
use totp_rs::{Algorithm, Secret, TOTP};

/// Length of one TOTP time step in seconds
pub const TOTP_STEP_SECS: u64 = 30;

/// Computes the MFA code for a secret at a given instant
pub trait TotpGenerator: Send + Sync {
    /// Code valid at `time`
    fn code_at(&self, secret: &str, time: DateTime<Utc>) -> Result<String, AuthError>;
}

/// RFC 6238 generator: SHA-1, six digits, 30 second steps
#[derive(Debug, Default, Clone, Copy)]
pub struct Rfc6238Totp;

impl TotpGenerator for Rfc6238Totp {
    fn code_at(&self, secret: &str, time: DateTime<Utc>) -> Result<String, AuthError> {
        // Authenticator apps display seeds grouped and in either case
        let cleaned: String = secret
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect::<String>()
            .to_uppercase();

        let bytes = Secret::Encoded(cleaned)
            .to_bytes()
            .map_err(|e| AuthError::InvalidTotpSecret(format!("{e:?}")))?;

        let seconds = u64::try_from(time.timestamp())
            .map_err(|_| AuthError::InvalidTotpSecret(format!("time before epoch: {time}")))?;

        let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, TOTP_STEP_SECS, bytes);
        Ok(totp.generate(seconds))
    }
}
