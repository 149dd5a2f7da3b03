//! Subdivision settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `DOC_COMMUNITY_*` environment variables.
//!
//! ```toml
//! max_total_communities = 100
//! min_population = 10
//! max_population = 100
//! similarity_threshold = 0.35
//! parallel_batch = 1
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "DOC_COMMUNITY_";

/// Parameters of one subdivision run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubdivisionConfig {
    /// Soft budget on the number of terminal communities.
    /// Only reported, never enforced.
    pub max_total_communities: usize,
    /// Buckets below this population are orphaned
    pub min_population: usize,
    /// Buckets above this population are subdivided
    pub max_population: usize,
    /// Edge-inclusion cutoff handed to the partition oracle
    pub similarity_threshold: f64,
    /// Frontier entries dispatched together by `resume_parallel`
    pub parallel_batch: usize,
}

impl Default for SubdivisionConfig {
    fn default() -> Self {
        Self {
            max_total_communities: 100,
            min_population: 10,
            max_population: 100,
            similarity_threshold: 0.35,
            parallel_batch: 1,
        }
    }
}

impl SubdivisionConfig {
    /// Config with the given acceptance band, other fields default
    pub fn with_band(min_population: usize, max_population: usize) -> Self {
        Self {
            min_population,
            max_population,
            ..Self::default()
        }
    }

    pub fn threshold(mut self, similarity_threshold: f64) -> Self {
        self.similarity_threshold = similarity_threshold;
        self
    }

    pub fn budget(mut self, max_total_communities: usize) -> Self {
        self.max_total_communities = max_total_communities;
        self
    }

    pub fn batch(mut self, parallel_batch: usize) -> Self {
        self.parallel_batch = parallel_batch;
        self
    }

    /// Load defaults + environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Serialized::defaults(Self::default())))
    }

    /// Load defaults + TOML file + environment.
    /// A missing file is not an error, figment just skips it.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(path.as_ref())),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().into()))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the population band, threshold range and batch size
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_population == 0 {
            return Err(ConfigError::ZeroMaxPopulation);
        }
        if self.min_population > self.max_population {
            return Err(ConfigError::PopulationBand {
                min: self.min_population,
                max: self.max_population,
            });
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Threshold(self.similarity_threshold));
        }
        if self.parallel_batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = SubdivisionConfig::default();
        assert_eq!(config.max_total_communities, 100);
        assert_eq!(config.min_population, 10);
        assert_eq!(config.max_population, 100);
        assert_eq!(config.similarity_threshold, 0.35);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_band_and_threshold() {
        assert!(matches!(
            SubdivisionConfig::with_band(5, 4).validate(),
            Err(ConfigError::PopulationBand { min: 5, max: 4 })
        ));
        assert!(matches!(
            SubdivisionConfig::with_band(0, 0).validate(),
            Err(ConfigError::ZeroMaxPopulation)
        ));
        assert!(matches!(
            SubdivisionConfig::default().threshold(1.5).validate(),
            Err(ConfigError::Threshold(_))
        ));
        assert!(matches!(
            SubdivisionConfig::default().batch(0).validate(),
            Err(ConfigError::ZeroBatch)
        ));
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("community.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "min_population = 2").unwrap();
        writeln!(file, "max_population = 3").unwrap();
        writeln!(file, "similarity_threshold = 0.5").unwrap();
        drop(file);

        let config = SubdivisionConfig::load_from(&path).unwrap();
        assert_eq!(config.min_population, 2);
        assert_eq!(config.max_population, 3);
        assert_eq!(config.similarity_threshold, 0.5);
        // untouched keys keep their defaults
        assert_eq!(config.max_total_communities, 100);
    }

    #[test]
    fn load_from_rejects_invalid_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("community.toml");
        std::fs::write(&path, "min_population = 50\nmax_population = 5\n").unwrap();
        assert!(matches!(
            SubdivisionConfig::load_from(&path),
            Err(ConfigError::PopulationBand { .. })
        ));
    }
}
