//! Account credentials loaded from process configuration
//!
//! Pure accessors: credentials are read from environment variables (a `.env`
//! file is loaded by the binary before this runs), live for one run and are
//! never written anywhere.

use crate::auth::AuthError;
use crate::Provider;

/// Environment variable names for one provider's secrets
#[derive(Debug, Clone, Copy)]
pub struct CredentialVars {
    /// Username variable
    pub username: &'static str,
    /// Password variable
    pub password: &'static str,
    /// TOTP seed variable, for providers with MFA
    pub totp_secret: Option<&'static str>,
}

/// Variables holding the utility provider's secrets
pub const HSV_VARS: CredentialVars = CredentialVars {
    username: "HSV_USERNAME",
    password: "HSV_PASSWORD",
    totp_secret: None,
};

/// Variables holding the thermostat vendor's secrets
pub const ECOBEE_VARS: CredentialVars = CredentialVars {
    username: "ECOBEE_USERNAME",
    password: "ECOBEE_PASSWORD",
    totp_secret: Some("ECOBEE_TOTP_SECRET"),
};

/// Account secrets for one provider
#[derive(Clone)]
pub struct Credential {
    provider: Provider,
    username: String,
    password: String,
    totp_secret: Option<String>,
}

impl Credential {
    /// Build a credential from explicit values
    pub fn new(
        provider: Provider,
        username: impl Into<String>,
        password: impl Into<String>,
        totp_secret: Option<String>,
    ) -> Self {
        Self {
            provider,
            username: username.into(),
            password: password.into(),
            totp_secret,
        }
    }

    /// Provider these secrets belong to
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Account username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// TOTP seed (base32), if configured
    pub fn totp_secret(&self) -> Option<&str> {
        self.totp_secret.as_deref()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "totp_secret",
                &self.totp_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Reads credentials from a variable lookup
pub struct CredentialStore<F = fn(&str) -> Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup: F,
}

impl CredentialStore {
    /// Store backed by the process environment
    pub fn from_env() -> Self {
        Self {
            lookup: |key| std::env::var(key).ok(),
        }
    }
}

impl<F> CredentialStore<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Store backed by an arbitrary lookup (tests, alternate sources)
    pub fn with_lookup(lookup: F) -> Self {
        Self { lookup }
    }

    /// Load the credential for `provider`
    ///
    /// Username and password are required; an empty value counts as missing.
    pub fn load(&self, provider: Provider) -> Result<Credential, AuthError> {
        let vars = match provider {
            Provider::Hsv => HSV_VARS,
            Provider::Ecobee => ECOBEE_VARS,
        };

        let username = self.required(vars.username)?;
        let password = self.required(vars.password)?;
        let totp_secret = vars.totp_secret.and_then(|var| self.optional(var));

        Ok(Credential::new(provider, username, password, totp_secret))
    }

    fn required(&self, var: &'static str) -> Result<String, AuthError> {
        self.optional(var).ok_or(AuthError::MissingCredential(var))
    }

    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|value| !value.trim().is_empty())
    }
}
