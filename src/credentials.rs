//! Registry credentials
//!
//! Read once at the CLI edge from the variables named in `[registry]` and
//! handed to the authenticator. The token never reaches a log line: it has a
//! redacting `Debug` impl and no `Display`.

use crate::config::schema::RegistryConfig;
use crate::error::{Outcome, PublishError};
use std::fmt;

/// An access token that refuses to be printed
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw value. Only the login call should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Username and token for one registry
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub token: Secret,
}

impl Credential {
    /// Read the credential from the process environment
    pub fn from_env(config: &RegistryConfig) -> Outcome<Self> {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    /// Read the credential through an arbitrary variable lookup
    pub fn from_lookup<F>(config: &RegistryConfig, lookup: F) -> Outcome<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PublishError::CredentialMissing(name.to_string()))
        };

        Ok(Self {
            username: read(&config.username_env)?,
            token: Secret::new(read(&config.token_env)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn registry() -> RegistryConfig {
        RegistryConfig {
            username_env: "REG_USER".to_string(),
            token_env: "REG_TOKEN".to_string(),
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn debug_never_shows_token() {
        let cred = Credential {
            username: "bot".to_string(),
            token: Secret::new("hunter2"),
        };
        let printed = format!("{:?}", cred);
        assert!(printed.contains("bot"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn from_lookup_reads_named_variables() {
        let vars: HashMap<&str, &str> = [("REG_USER", "bot"), ("REG_TOKEN", " tok ")].into();
        let cred = Credential::from_lookup(&registry(), |k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cred.username, "bot");
        assert_eq!(cred.token.expose(), "tok");
    }

    #[test]
    fn missing_or_blank_variable_is_an_error() {
        let vars: HashMap<&str, &str> = [("REG_USER", "bot"), ("REG_TOKEN", "  ")].into();
        let err = Credential::from_lookup(&registry(), |k| vars.get(k).map(|v| v.to_string()))
            .unwrap_err();
        assert!(matches!(err, PublishError::CredentialMissing(name) if name == "REG_TOKEN"));
    }
}
