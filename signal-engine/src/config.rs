//! Engine configuration
//!
//! One nested structure covering every stage, loadable from TOML and
//! validated before the engine accepts traffic. Thresholds here are
//! deployment configuration, not architecture.

use crate::patterns::MatcherConfig;
use crate::pipeline::PipelineConfig;
use crate::screening::ScreeningConfig;
use crate::translator::MessageTable;
use crate::validation::ValidatorConfig;
use anyhow::{Context, Result};
use common::EngineError;
use market_data::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub screening: ScreeningConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub translator: MessageTable,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// TTL classes in seconds, the serde-friendly face of `CacheConfig`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub price_ttl_secs: u64,
    pub analytics_ttl_secs: u64,
    pub assessment_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            price_ttl_secs: 60,
            analytics_ttl_secs: 15 * 60,
            assessment_ttl_secs: 60 * 60,
            fetch_timeout_secs: 10,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            price_ttl: Duration::from_secs(settings.price_ttl_secs),
            analytics_ttl: Duration::from_secs(settings.analytics_ttl_secs),
            assessment_ttl: Duration::from_secs(settings.assessment_ttl_secs),
            fetch_timeout: Duration::from_secs(settings.fetch_timeout_secs),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults for absent sections
    pub fn from_file(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let engine: EngineConfig = config
            .try_deserialize()
            .context("failed to deserialize engine config")?;
        engine.validate()?;
        Ok(engine)
    }

    /// Cross-field checks that serde cannot express
    pub fn validate(&self) -> Result<(), EngineError> {
        self.translator.validate()?;
        if self.matcher.top_n == 0 {
            return Err(EngineError::InvalidConfig("matcher.top_n is zero".into()));
        }
        if self.validator.final_size > self.matcher.top_n {
            return Err(EngineError::InvalidConfig(format!(
                "validator.final_size {} exceeds matcher.top_n {}",
                self.validator.final_size, self.matcher.top_n
            )));
        }
        if !(0.0..=1.0).contains(&self.validator.discount) {
            return Err(EngineError::InvalidConfig(
                "validator.discount outside [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline.assistant_blend) {
            return Err(EngineError::InvalidConfig(
                "pipeline.assistant_blend outside [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        (&self.cache).into()
    }
}
