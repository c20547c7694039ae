//! Configuration management

use chemsync_common::env;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbConfig;
use crate::error::{IngestError, Result};
use crate::ingest::common::{ContainerReader, DEFAULT_MEMBER_SUFFIX};
use crate::ingest::enrich::RecordEnricher;
use crate::ingest::loader::{BatchLoader, DEFAULT_BATCH_SIZE, DEFAULT_DELETE_BATCH_SIZE};
use crate::ingest::reconcile::ReconcileStrategy;
use crate::ingest::sdf::{ParserOptions, RecordPolicy};

/// Default number of enrichment workers per batch.
pub const DEFAULT_ENRICH_WORKERS: usize = 1;

/// Identifier field and prefix of a known dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetProfile {
    pub name: &'static str,
    pub id_tag: &'static str,
    pub id_prefix: &'static str,
}

pub const PUBCHEM: DatasetProfile = DatasetProfile {
    name: "pubchem",
    id_tag: "PUBCHEM_COMPOUND_CID",
    id_prefix: "",
};

pub const DRUGBANK: DatasetProfile = DatasetProfile {
    name: "drugbank",
    id_tag: "DATABASE_ID",
    id_prefix: "DB",
};

pub const CHEMBL: DatasetProfile = DatasetProfile {
    name: "chembl",
    id_tag: "chembl_id",
    id_prefix: "CHEMBL",
};

/// Ingest configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Dataset name override (`DATASET`), the subcommand profile otherwise
    pub dataset: Option<String>,
    pub database: DbConfig,
    pub sdf: SdfSettings,
    pub load: LoadSettings,
}

/// How records are recognized in structure-data files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdfSettings {
    /// Identifier field name, the profile field otherwise
    pub id_tag: Option<String>,
    /// Literal identifier prefix, the profile prefix otherwise
    pub id_prefix: Option<String>,
    pub policy: RecordPolicy,
    /// Archive members are read when their name ends with this suffix
    pub member_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSettings {
    pub batch_size: usize,
    pub delete_batch_size: usize,
    pub strategy: ReconcileStrategy,
    pub enrich_workers: usize,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            strategy: ReconcileStrategy::default(),
            enrich_workers: DEFAULT_ENRICH_WORKERS,
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            dataset: env::optional("DATASET"),
            database: DbConfig::from_env()?,
            sdf: SdfSettings::from_env()?,
            load: LoadSettings::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.sdf.validate()?;
        self.load.validate()?;

        if let Some(dataset) = &self.dataset {
            if dataset.trim().is_empty() {
                return Err(IngestError::Config("DATASET cannot be blank".to_string()));
            }
        }

        Ok(())
    }

    /// Dataset name for a run using `profile`
    pub fn dataset_name(&self, profile: &DatasetProfile) -> String {
        self.dataset
            .clone()
            .unwrap_or_else(|| profile.name.to_string())
    }

    pub fn batch_loader(&self, profile: &DatasetProfile) -> BatchLoader {
        BatchLoader::new(
            self.sdf.parser_options(profile),
            ContainerReader::new(self.sdf.member_suffix.clone()),
        )
        .with_batch_sizes(self.load.batch_size, self.load.delete_batch_size)
    }

    /// Loader that runs every batch through `enricher` before it is written
    pub fn enriched_loader(
        &self,
        profile: &DatasetProfile,
        enricher: Arc<dyn RecordEnricher>,
    ) -> BatchLoader {
        self.batch_loader(profile)
            .with_enricher(enricher, self.load.enrich_workers)
    }
}

impl SdfSettings {
    /// Load from `SDF_ID_TAG`, `SDF_ID_PREFIX`, `SDF_POLICY` and `SDF_MEMBER_SUFFIX`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            id_tag: env::optional("SDF_ID_TAG"),
            id_prefix: std::env::var("SDF_ID_PREFIX").ok(),
            policy: env::optional("SDF_POLICY")
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or_default(),
            member_suffix: env::optional("SDF_MEMBER_SUFFIX")
                .unwrap_or_else(|| DEFAULT_MEMBER_SUFFIX.to_string()),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(tag) = &self.id_tag {
            if tag.contains('>') || tag.contains('<') {
                return Err(IngestError::Config(format!(
                    "SDF_ID_TAG must be a bare field name, got '{}'",
                    tag
                )));
            }
        }
        if self.member_suffix.is_empty() {
            return Err(IngestError::Config(
                "SDF_MEMBER_SUFFIX cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn parser_options(&self, profile: &DatasetProfile) -> ParserOptions {
        let tag = self.id_tag.as_deref().unwrap_or(profile.id_tag);
        let prefix = self.id_prefix.as_deref().unwrap_or(profile.id_prefix);
        ParserOptions::new(tag)
            .with_policy(self.policy)
            .with_prefix(prefix)
    }
}

impl LoadSettings {
    /// Load from `LOAD_BATCH_SIZE`, `DELETE_BATCH_SIZE`, `RECONCILE_STRATEGY`
    /// and `ENRICH_WORKERS`
    pub fn from_env() -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            batch_size: env::parse_or("LOAD_BATCH_SIZE", default.batch_size)?,
            delete_batch_size: env::parse_or("DELETE_BATCH_SIZE", default.delete_batch_size)?,
            strategy: env::optional("RECONCILE_STRATEGY")
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or(default.strategy),
            enrich_workers: env::parse_or("ENRICH_WORKERS", default.enrich_workers)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::Config(
                "LOAD_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.delete_batch_size == 0 {
            return Err(IngestError::Config(
                "DELETE_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.enrich_workers == 0 {
            return Err(IngestError::Config(
                "ENRICH_WORKERS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            dataset: None,
            database: DbConfig::default(),
            sdf: SdfSettings {
                member_suffix: DEFAULT_MEMBER_SUFFIX.to_string(),
                ..SdfSettings::default()
            },
            load: LoadSettings::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.load.batch_size, 1000);
        assert_eq!(config.load.delete_batch_size, 10000);
        assert_eq!(config.load.strategy, ReconcileStrategy::Stamped);
    }

    #[test]
    fn test_profile_supplies_identifier_field() {
        let config = config();
        let options = config.sdf.parser_options(&DRUGBANK);

        assert_eq!(options.tag_line(), "> <DATABASE_ID>");
        assert_eq!(options.id_prefix(), "DB");
        assert_eq!(config.dataset_name(&DRUGBANK), "drugbank");
    }

    #[test]
    fn test_overrides_win_over_profile() {
        let mut config = config();
        config.dataset = Some("pubchem-mirror".to_string());
        config.sdf.id_tag = Some("CID".to_string());
        config.sdf.id_prefix = Some(String::new());

        let options = config.sdf.parser_options(&CHEMBL);
        assert_eq!(options.tag_line(), "> <CID>");
        assert_eq!(options.id_prefix(), "");
        assert_eq!(config.dataset_name(&PUBCHEM), "pubchem-mirror");
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = config();
        config.load.delete_batch_size = 0;
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));

        let mut config = self::config();
        config.sdf.id_tag = Some("> <ID>".to_string());
        assert!(config.validate().is_err());
    }
}
