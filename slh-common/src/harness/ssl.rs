//! Randomized TLS posture for a suite.
//!
//! The harness only consumes the posture: whether the suite runs
//! encrypted, whether clients authenticate, and which client socket
//! factory the system under test should build. How the factory is
//! realized is up to the caller.

use super::context::{SuiteSeed, draw_chance};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::info;

/// URL scheme advertised to the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UrlScheme {
    Http,
    Https,
}

impl UrlScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for UrlScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor for the client socket factory clients should use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClientSocketFactory {
    pub scheme: UrlScheme,
    pub client_auth: bool,
}

/// The TLS posture chosen for one suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SslPosture {
    pub encrypted: bool,
    pub mutual_auth: bool,
    pub client_socket_factory: ClientSocketFactory,
    /// How the posture was chosen, for logs.
    pub debug: String,
}

impl SslPosture {
    /// No TLS, no client auth.
    pub fn plain() -> Self {
        Self::from_flags(false, false, "plain (fast mode)".to_string())
    }

    fn from_flags(encrypted: bool, mutual_auth: bool, debug: String) -> Self {
        let scheme = if encrypted {
            UrlScheme::Https
        } else {
            UrlScheme::Http
        };
        Self {
            encrypted,
            mutual_auth,
            client_socket_factory: ClientSocketFactory {
                scheme,
                client_auth: mutual_auth,
            },
            debug,
        }
    }

    pub fn url_scheme(&self) -> UrlScheme {
        self.client_socket_factory.scheme
    }
}

/// Errors from an SSL provider. Any of them fails suite setup.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SslError {
    #[error("{name} probability must be within [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("SSL provider failed: {0}")]
    Provider(String),
}

/// Supplies the suite's TLS posture. Same seed, same posture.
pub trait SslProvider: Send + Sync {
    fn randomize(&self, seed: SuiteSeed, fast_mode: bool) -> Result<SslPosture, SslError>;
}

/// Seed-driven provider: coin flips for TLS and client auth.
#[derive(Debug, Clone)]
pub struct RandomizedSsl {
    pub ssl_probability: f64,
    pub client_auth_probability: f64,
    /// Never pick client auth (set on macOS by default).
    pub suppress_client_auth: bool,
}

impl Default for RandomizedSsl {
    fn default() -> Self {
        Self {
            ssl_probability: 0.5,
            client_auth_probability: 0.5,
            suppress_client_auth: cfg!(target_os = "macos"),
        }
    }
}

impl RandomizedSsl {
    pub fn new(ssl_probability: f64, client_auth_probability: f64) -> Result<Self, SslError> {
        check_probability("ssl", ssl_probability)?;
        check_probability("client auth", client_auth_probability)?;
        Ok(Self {
            ssl_probability,
            client_auth_probability,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn suppress_client_auth(mut self, suppress: bool) -> Self {
        self.suppress_client_auth = suppress;
        self
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), SslError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SslError::InvalidProbability { name, value })
    }
}

impl SslProvider for RandomizedSsl {
    fn randomize(&self, seed: SuiteSeed, fast_mode: bool) -> Result<SslPosture, SslError> {
        if fast_mode {
            return Ok(SslPosture::plain());
        }
        check_probability("ssl", self.ssl_probability)?;
        check_probability("client auth", self.client_auth_probability)?;

        let client_auth_probability = if self.suppress_client_auth {
            0.0
        } else {
            self.client_auth_probability
        };

        let mut rng = seed.stream("ssl");
        let encrypted = draw_chance(&mut rng, self.ssl_probability);
        let client_auth = draw_chance(&mut rng, client_auth_probability);
        // Client auth is only meaningful over TLS.
        let mutual_auth = encrypted && client_auth;

        let mut debug = format!(
            "ssl={:.2} clientAuth={:.2} seed={seed}",
            self.ssl_probability, client_auth_probability
        );
        if self.suppress_client_auth {
            debug.push_str(" w/ suppressed clientAuth");
        }

        let posture = SslPosture::from_flags(encrypted, mutual_auth, debug);
        info!(
            encrypted = posture.encrypted,
            mutual_auth = posture.mutual_auth,
            via = %posture.debug,
            "randomized ssl posture"
        );
        Ok(posture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_guard;
    use proptest::prelude::*;

    #[test]
    fn test_fast_mode_is_plain() {
        let _guard = test_guard!();
        let posture = RandomizedSsl::default()
            .randomize(SuiteSeed(99), true)
            .unwrap();
        assert_eq!(posture, SslPosture::plain());
        assert_eq!(posture.url_scheme(), UrlScheme::Http);
    }

    #[test]
    fn test_certain_probabilities() {
        let _guard = test_guard!();
        let provider = RandomizedSsl::new(1.0, 1.0)
            .unwrap()
            .suppress_client_auth(false);
        let posture = provider.randomize(SuiteSeed(3), false).unwrap();
        assert!(posture.encrypted);
        assert!(posture.mutual_auth);
        assert_eq!(posture.url_scheme(), UrlScheme::Https);
        assert!(posture.client_socket_factory.client_auth);
    }

    #[test]
    fn test_suppressed_client_auth_is_recorded() {
        let _guard = test_guard!();
        let provider = RandomizedSsl::new(1.0, 1.0)
            .unwrap()
            .suppress_client_auth(true);
        let posture = provider.randomize(SuiteSeed(3), false).unwrap();
        assert!(posture.encrypted);
        assert!(!posture.mutual_auth);
        assert!(posture.debug.contains("suppressed clientAuth"));
    }

    #[test]
    fn test_rejects_bad_probability() {
        let _guard = test_guard!();
        let err = RandomizedSsl::new(1.5, 0.5).unwrap_err();
        assert!(matches!(err, SslError::InvalidProbability { name: "ssl", .. }));
    }

    proptest! {
        #[test]
        fn prop_same_seed_same_posture(seed in any::<u64>()) {
            let provider = RandomizedSsl::default().suppress_client_auth(false);
            let first = provider.randomize(SuiteSeed(seed), false).unwrap();
            let second = provider.randomize(SuiteSeed(seed), false).unwrap();
            prop_assert_eq!(&first, &second);
        }

        #[test]
        fn prop_client_auth_implies_tls(seed in any::<u64>()) {
            let provider = RandomizedSsl::default().suppress_client_auth(false);
            let posture = provider.randomize(SuiteSeed(seed), false).unwrap();
            prop_assert!(!posture.mutual_auth || posture.encrypted);
            prop_assert_eq!(posture.encrypted, posture.url_scheme() == UrlScheme::Https);
        }
    }
}
