use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Settings of a [`GlobalContext`](crate::GlobalContext).
///
/// Every rank should use the same configuration: the settings decide which
/// collectives are entered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Gather the local shapes of all ranks when a local tensor becomes a split shard,
    /// instead of assuming that every shard has the same extent.
    pub sync_local_shapes: bool,
    /// Broadcast the seed of random creation ops from the first rank of the placement
    /// when the generator was never seeded manually.
    pub sync_random_seed: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            sync_local_shapes: false,
            sync_random_seed: true,
        }
    }
}

impl GlobalConfig {
    /// Sets [`sync_local_shapes`](GlobalConfig::sync_local_shapes).
    pub fn with_sync_local_shapes(mut self, enabled: bool) -> Self {
        self.sync_local_shapes = enabled;
        self
    }

    /// Sets [`sync_random_seed`](GlobalConfig::sync_random_seed).
    pub fn with_sync_random_seed(mut self, enabled: bool) -> Self {
        self.sync_random_seed = enabled;
        self
    }

    /// Serializes the configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a configuration from JSON. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the configuration as JSON to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reads a JSON configuration from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_json_round_trip() {
        let config = GlobalConfig::default().with_sync_local_shapes(true);

        let parsed = GlobalConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config = GlobalConfig::from_json(r#"{ "sync_random_seed": false }"#).unwrap();

        assert!(!config.sync_local_shapes);
        assert!(!config.sync_random_seed);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.json");
        let config = GlobalConfig::default().with_sync_random_seed(false);

        config.save(&path).unwrap();
        let loaded = GlobalConfig::load(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_rejects_malformed_json() {
        assert!(matches!(
            GlobalConfig::from_json("{ not json"),
            Err(crate::GlobalError::Config(_))
        ));
    }
}
