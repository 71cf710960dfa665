//! Registry authentication
//!
//! One login per run. The session it produces is only a record of who is
//! logged in where; the binding itself lives in the engine's run-scoped
//! state and disappears with it.

use crate::config::schema::RegistryConfig;
use crate::credentials::Credential;
use crate::engine::BuildEngine;
use crate::error::AuthError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// An established registry login
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub registry: String,
    pub username: String,
    pub established_at: DateTime<Utc>,
}

/// Bounded exponential backoff for rate-limited logins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            max_attempts: config.max_auth_attempts.max(1),
            initial_backoff: Duration::from_millis(config.auth_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Log in once
pub async fn authenticate(
    engine: &dyn BuildEngine,
    registry: &str,
    credential: &Credential,
) -> Result<AuthSession, AuthError> {
    engine.login(registry, credential).await?;
    info!("Logged in to {} as {}", registry, credential.username);

    Ok(AuthSession {
        registry: registry.to_string(),
        username: credential.username.clone(),
        established_at: Utc::now(),
    })
}

/// Log in, retrying rate-limited attempts with exponential backoff. Any
/// other failure is returned immediately.
pub async fn authenticate_with_retry(
    engine: &dyn BuildEngine,
    registry: &str,
    credential: &Credential,
    policy: RetryPolicy,
) -> Result<AuthSession, AuthError> {
    let mut attempt = 1;
    loop {
        match authenticate(engine, registry, credential).await {
            Ok(session) => return Ok(session),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Login to {} rate limited (attempt {}/{}), retrying in {:?}",
                    registry, attempt, policy.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Secret;
    use crate::engine::fake::FakeEngine;
    use crate::error::AuthFailure;

    fn credential() -> Credential {
        Credential {
            username: "ci-bot".to_string(),
            token: Secret::new("t0ken"),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn policy_from_config_never_zero_attempts() {
        let config = RegistryConfig {
            max_auth_attempts: 0,
            ..RegistryConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }

    #[tokio::test]
    async fn session_records_identity() {
        let engine = FakeEngine::new();
        let session = authenticate(&engine, "docker.io", &credential())
            .await
            .unwrap();

        assert_eq!(session.registry, "docker.io");
        assert_eq!(session.username, "ci-bot");
        assert_eq!(engine.calls(), vec!["login docker.io ci-bot"]);
    }

    #[tokio::test]
    async fn rate_limited_login_is_retried() {
        let engine =
            FakeEngine::new().with_logins([AuthFailure::RateLimited, AuthFailure::RateLimited]);
        let session = authenticate_with_retry(&engine, "docker.io", &credential(), policy(4))
            .await
            .unwrap();

        assert_eq!(session.username, "ci-bot");
        assert_eq!(engine.calls_starting_with("login").len(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let engine = FakeEngine::new().with_logins([AuthFailure::RateLimited; 5]);
        let err = authenticate_with_retry(&engine, "docker.io", &credential(), policy(3))
            .await
            .unwrap_err();

        assert_eq!(err.reason, AuthFailure::RateLimited);
        assert_eq!(engine.calls_starting_with("login").len(), 3);
    }

    #[tokio::test]
    async fn invalid_credentials_are_not_retried() {
        let engine = FakeEngine::new().with_logins([AuthFailure::InvalidCredentials]);
        let err = authenticate_with_retry(&engine, "docker.io", &credential(), policy(4))
            .await
            .unwrap_err();

        assert_eq!(err.reason, AuthFailure::InvalidCredentials);
        assert_eq!(engine.calls_starting_with("login").len(), 1);
    }
}
