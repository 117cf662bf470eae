//! Router configuration
//!
//! One serde struct per component, each with defaults, so a profile file
//! only needs the keys it changes. A few knobs can also be overridden from
//! the environment:
//!
//! | Variable                          | Field                               |
//! |-----------------------------------|-------------------------------------|
//! | `MODEL_ROUTER_ATTEMPT_TIMEOUT_MS` | `dispatch.attempt_timeout_ms`       |
//! | `MODEL_ROUTER_MAX_CANDIDATES`     | `policy.max_candidates`             |
//! | `MODEL_ROUTER_COST_PENALTY`       | `policy.weights.cost_penalty`       |

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchConfig;
use crate::error::ConfigError;
use crate::router::{ClassifierConfig, RouterPolicy};

pub const ENV_ATTEMPT_TIMEOUT_MS: &str = "MODEL_ROUTER_ATTEMPT_TIMEOUT_MS";
pub const ENV_MAX_CANDIDATES: &str = "MODEL_ROUTER_MAX_CANDIDATES";
pub const ENV_COST_PENALTY: &str = "MODEL_ROUTER_COST_PENALTY";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub classifier: ClassifierConfig,
    pub policy: RouterPolicy,
    pub dispatch: DispatchConfig,
}

impl RouterConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ATTEMPT_TIMEOUT_MS) {
            self.dispatch.attempt_timeout_ms = parse_env(ENV_ATTEMPT_TIMEOUT_MS, value, "integer")?;
        }
        if let Some(value) = lookup(ENV_MAX_CANDIDATES) {
            self.policy.max_candidates = Some(parse_env(ENV_MAX_CANDIDATES, value, "integer")?);
        }
        if let Some(value) = lookup(ENV_COST_PENALTY) {
            self.policy.weights.cost_penalty = parse_env(ENV_COST_PENALTY, value, "number")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.classifier
            .validate()
            .map_err(|message| ConfigError::Invalid {
                section: "classifier",
                message,
            })?;
        self.policy.validate().map_err(|message| ConfigError::Invalid {
            section: "policy",
            message,
        })?;
        self.dispatch
            .validate()
            .map_err(|message| ConfigError::Invalid {
                section: "dispatch",
                message,
            })?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    var: &str,
    value: String,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::BadEnv {
        var: var.to_string(),
        value,
        expected,
    })
}
