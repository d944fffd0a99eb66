//! Configuration for the orchestration core, loadable from TOML.
//!
//! ```toml
//! [provider]
//! endpoint = "https://llm.internal/v1/chat/completions"
//! model = "council-large"
//! timeout_secs = 60
//!
//! [engine]
//! max_iterations = 20
//!
//! [plan]
//! max_concurrent = 4
//! step_timeout_secs = 90
//! hallucination_review_threshold = 0.7
//!
//! [council]
//! threshold = 0.66
//!
//! [logging]
//! json = false
//! level = "info"
//! ```
//!
//! Every section is optional; missing fields take their defaults. Config is
//! passed explicitly into constructors and never read from globals.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{ConclaveError, Result};

/// Text generation provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub model: String,
    /// Bearer token. Prefer supplying it via the CLI/env rather than a file.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/v1/chat/completions".to_string(),
            model: "default".to_string(),
            api_key: None,
            timeout_secs: 60,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Workflow graph engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard ceiling on node steps per run.
    pub max_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_iterations: 20 }
    }
}

/// Plan executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Maximum steps in flight within one wave.
    pub max_concurrent: usize,
    pub step_timeout_secs: u64,
    /// Steps whose hallucination risk exceeds this are escalated for review.
    pub hallucination_review_threshold: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            step_timeout_secs: 90,
            hallucination_review_threshold: 0.7,
        }
    }
}

impl PlanConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Council protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Minimum weighted approval for consensus (inclusive).
    pub threshold: f64,
    pub call_timeout_secs: u64,
    pub temperature: f32,
    /// Word-set similarity at or above which two perspectives count as duplicates.
    pub similarity_threshold: f64,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            threshold: 0.66,
            call_timeout_secs: 90,
            temperature: 0.7,
            similarity_threshold: 0.8,
        }
    }
}

impl CouncilConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Log output settings consumed by [`crate::telemetry::init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConclaveConfig {
    pub provider: ProviderConfig,
    pub engine: EngineConfig,
    pub plan: PlanConfig,
    pub council: CouncilConfig,
    pub logging: LoggingConfig,
}

impl ConclaveConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| ConclaveError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the engines cannot honor.
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.council.threshold) {
            return Err(ConclaveError::InvalidConfig(format!(
                "council.threshold must be within 0..=1, got {}",
                self.council.threshold
            )));
        }
        if !unit.contains(&self.council.similarity_threshold) {
            return Err(ConclaveError::InvalidConfig(format!(
                "council.similarity_threshold must be within 0..=1, got {}",
                self.council.similarity_threshold
            )));
        }
        if !unit.contains(&self.plan.hallucination_review_threshold) {
            return Err(ConclaveError::InvalidConfig(format!(
                "plan.hallucination_review_threshold must be within 0..=1, got {}",
                self.plan.hallucination_review_threshold
            )));
        }
        if self.plan.max_concurrent == 0 {
            return Err(ConclaveError::InvalidConfig(
                "plan.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.engine.max_iterations == 0 {
            return Err(ConclaveError::InvalidConfig(
                "engine.max_iterations must be at least 1".to_string(),
            ));
        }
        for (name, secs) in [
            ("provider.timeout_secs", self.provider.timeout_secs),
            ("plan.step_timeout_secs", self.plan.step_timeout_secs),
            ("council.call_timeout_secs", self.council.call_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConclaveError::InvalidConfig(format!(
                    "{name} must be at least 1 second"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConclaveConfig::default();
        assert_eq!(config.engine.max_iterations, 20);
        assert_eq!(config.plan.max_concurrent, 4);
        assert!((config.council.threshold - 0.66).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ConclaveConfig::from_toml_str(
            r#"
            [council]
            threshold = 0.75

            [provider]
            model = "m"
            "#,
        )
        .unwrap();
        assert!((config.council.threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.provider.model, "m");
        assert_eq!(config.provider.timeout_secs, 60);
        assert_eq!(config.engine.max_iterations, 20);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let err = ConclaveConfig::from_toml_str("[council]\nthreshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConclaveError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = ConclaveConfig::from_toml_str("[plan]\nmax_concurrent = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        for (toml, field) in [
            ("[plan]\nstep_timeout_secs = 0\n", "plan.step_timeout_secs"),
            ("[council]\ncall_timeout_secs = 0\n", "council.call_timeout_secs"),
            ("[provider]\ntimeout_secs = 0\n", "provider.timeout_secs"),
        ] {
            let err = ConclaveConfig::from_toml_str(toml).unwrap_err();
            assert!(err.to_string().contains(field), "{err}");
        }
        assert!(ConclaveConfig::from_toml_str("[plan]\nstep_timeout_secs = 1\n").is_ok());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = ConclaveConfig::default();
        config.provider.api_key = Some("secret".to_string());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
