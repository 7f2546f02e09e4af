//! External login driver process
//!
//! The vendor's browser login is automated by a separate program (for example
//! a Playwright script). Each step is one invocation:
//!
//! ```text
//! <driver> credentials   stdin {"username","password"}
//! <driver> mfa           stdin {"challenge","code"}
//! <driver> derive        stdin {"session"}
//! ```
//!
//! and the program prints a single JSON object tagged by `status` on stdout.

use super::session::{
    DeriveOutcome, LoginStep, LoginSurface, MfaChallenge, MfaOutcome, SessionGrant, TokenGrant,
};
use super::AuthError;
use crate::sync::config::DRIVER_STEP_TIMEOUT;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DriverResponse {
    Established {
        session: String,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default)]
        expires_in: Option<u64>,
    },
    MfaRequired {
        challenge: String,
    },
    Rejected {
        #[serde(default)]
        reason: String,
    },
    Token {
        access_token: String,
        #[serde(default)]
        expires_in: Option<u64>,
    },
    SessionExpired,
}

impl DriverResponse {
    fn status(&self) -> &'static str {
        match self {
            DriverResponse::Established { .. } => "established",
            DriverResponse::MfaRequired { .. } => "mfa_required",
            DriverResponse::Rejected { .. } => "rejected",
            DriverResponse::Token { .. } => "token",
            DriverResponse::SessionExpired => "session_expired",
        }
    }
}

fn session_grant(session: String, access_token: Option<String>, expires_in: Option<u64>) -> SessionGrant {
    SessionGrant {
        session,
        token: access_token.map(|access_token| TokenGrant {
            access_token,
            expires_in,
        }),
    }
}

/// [`LoginSurface`] backed by an external program
#[derive(Debug, Clone)]
pub struct ExternalLoginDriver {
    program: Option<PathBuf>,
    step_timeout: Duration,
}

impl ExternalLoginDriver {
    /// Create a driver; `None` fails every step with a configuration hint
    pub fn new(program: Option<PathBuf>) -> Self {
        Self {
            program,
            step_timeout: DRIVER_STEP_TIMEOUT,
        }
    }

    /// Override the per-step timeout
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    async fn run_step(
        &self,
        step: &str,
        request: serde_json::Value,
    ) -> Result<DriverResponse, AuthError> {
        let program = self.program.as_ref().ok_or_else(|| {
            AuthError::Driver("no login driver configured (set ECOBEE_LOGIN_DRIVER)".to_string())
        })?;

        debug!(step, program = %program.display(), "Invoking login driver");

        let mut child = Command::new(program)
            .arg(step)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AuthError::Driver(format!("failed to start {}: {e}", program.display())))?;

        let payload = serde_json::to_vec(&request)
            .map_err(|e| AuthError::Driver(format!("failed to encode request: {e}")))?;

        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.step_timeout, exchange)
            .await
            .map_err(|_| AuthError::LoginTimeout(self.step_timeout))?
            .map_err(|e| AuthError::Driver(format!("step '{step}' failed: {e}")))?;

        if !output.status.success() {
            return Err(AuthError::Driver(format!(
                "step '{step}' exited with {}",
                output.status
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            AuthError::Driver(format!("step '{step}' produced unparseable output: {e}"))
        })
    }
}

fn unexpected(step: &str, response: &DriverResponse) -> AuthError {
    AuthError::Driver(format!(
        "step '{step}' returned unexpected status '{}'",
        response.status()
    ))
}

#[async_trait]
impl LoginSurface for ExternalLoginDriver {
    async fn submit_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginStep, AuthError> {
        let request = json!({ "username": username, "password": password });
        match self.run_step("credentials", request).await? {
            DriverResponse::Established {
                session,
                access_token,
                expires_in,
            } => Ok(LoginStep::Established(session_grant(
                session,
                access_token,
                expires_in,
            ))),
            DriverResponse::MfaRequired { challenge } => {
                Ok(LoginStep::MfaRequired(MfaChallenge(challenge)))
            }
            DriverResponse::Rejected { reason } => Ok(LoginStep::Rejected(reason)),
            other => Err(unexpected("credentials", &other)),
        }
    }

    async fn submit_mfa(
        &self,
        challenge: &MfaChallenge,
        code: &str,
    ) -> Result<MfaOutcome, AuthError> {
        let request = json!({ "challenge": challenge.0, "code": code });
        match self.run_step("mfa", request).await? {
            DriverResponse::Established {
                session,
                access_token,
                expires_in,
            } => Ok(MfaOutcome::Established(session_grant(
                session,
                access_token,
                expires_in,
            ))),
            DriverResponse::Rejected { reason } => Ok(MfaOutcome::Rejected(reason)),
            other => Err(unexpected("mfa", &other)),
        }
    }

    async fn derive_token(&self, session: &str) -> Result<DeriveOutcome, AuthError> {
        let request = json!({ "session": session });
        match self.run_step("derive", request).await? {
            DriverResponse::Token {
                access_token,
                expires_in,
            } => Ok(DeriveOutcome::Token(TokenGrant {
                access_token,
                expires_in,
            })),
            DriverResponse::SessionExpired => Ok(DeriveOutcome::SessionExpired),
            other => Err(unexpected("derive", &other)),
        }
    }
}
