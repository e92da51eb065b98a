// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::tx_management::Error;
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Yaml};
use fjall::PartitionCreateOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SEQUENCE_CACHE: i64 = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Every transaction begun against the database is read-only.
    pub read_only: bool,
    /// Sync the store to disk after every commit batch rather than leaving it buffered.
    pub sync_on_commit: bool,
    pub compaction: CompactionConfig,
    /// Cache size given to custom sequences created without one.
    pub default_sequence_cache: i64,
    /// Commits slower than this are logged at warn level.
    pub slow_commit_warn_ms: u64,
    /// How many times an out-of-transaction sequence counter write is retried on conflict.
    pub sequence_persist_retries: usize,

    /// Per-partition configurations
    pub catalog_partition: Option<TableConfig>,
    pub rows_partition: Option<TableConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            sync_on_commit: false,
            compaction: CompactionConfig::default(),
            default_sequence_cache: DEFAULT_SEQUENCE_CACHE,
            slow_commit_warn_ms: 1000,
            sequence_persist_retries: 8,
            catalog_partition: None,
            rows_partition: None,
        }
    }
}

impl DatabaseConfig {
    /// Defaults, overlaid with a YAML or JSON file (by extension) when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut figment = Figment::from(Serialized::defaults(DatabaseConfig::default()));
        if let Some(path) = path {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Yaml::file(path)),
            };
        }
        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    pub fn slow_commit_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_commit_warn_ms)
    }

    pub fn catalog_partition_options(&self) -> PartitionCreateOptions {
        self.catalog_partition
            .as_ref()
            .map(|c| c.partition_options())
            .unwrap_or_default()
    }

    pub fn rows_partition_options(&self) -> PartitionCreateOptions {
        self.rows_partition
            .as_ref()
            .map(|c| c.partition_options())
            .unwrap_or_default()
    }
}

/// When a table source is worth compacting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Minimum fraction of dead row slots.
    pub dead_ratio: f64,
    /// Sources with fewer slots than this are never compacted.
    pub min_slots: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            dead_ratio: 0.5,
            min_slots: 16,
        }
    }
}

/// Per-partition configuration.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Various fjall partition creation options.
    /// Refer to the fjall documentation for more information.
    pub max_memtable_size: Option<u32>,
    pub block_size: Option<u32>,
}

impl TableConfig {
    pub fn partition_options(&self) -> PartitionCreateOptions {
        let mut opts = PartitionCreateOptions::default();
        if let Some(max_memtable_size) = self.max_memtable_size {
            opts = opts.max_memtable_size(max_memtable_size);
        }
        if let Some(block_size) = self.block_size {
            opts = opts.block_size(block_size);
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        assert_eq!(DatabaseConfig::load(None).unwrap(), DatabaseConfig::default());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "read_only: true\ncompaction:\n  dead_ratio: 0.25\n  min_slots: 4\nrows_partition:\n  block_size: 8192"
        )
        .unwrap();
        let config = DatabaseConfig::load(Some(file.path())).unwrap();
        assert!(config.read_only);
        assert_eq!(config.compaction.dead_ratio, 0.25);
        assert_eq!(config.compaction.min_slots, 4);
        assert_eq!(config.default_sequence_cache, DEFAULT_SEQUENCE_CACHE);
        assert_eq!(
            config.rows_partition,
            Some(TableConfig {
                max_memtable_size: None,
                block_size: Some(8192),
            })
        );
    }

    #[test]
    fn test_json_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"default_sequence_cache": 50, "slow_commit_warn_ms": 5}}"#).unwrap();
        let config = DatabaseConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.default_sequence_cache, 50);
        assert_eq!(config.slow_commit_threshold(), Duration::from_millis(5));
        assert!(!config.read_only);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "compaction: [not, a, map]").unwrap();
        assert!(matches!(
            DatabaseConfig::load(Some(file.path())),
            Err(Error::Config(_))
        ));
    }
}
