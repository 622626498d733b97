//! User skill configuration (read-only here).
//!
//! Owned and written by the settings layer. The agent loads it fresh for
//! every run and tolerates partially broken entries: a malformed filter or
//! metric is logged and dropped, the rest of the config still applies.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use querypilot_llm::ConfigError;
use querypilot_sql::{FilterExpr, MetricDefinition};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const SKILL_CONFIG_VERSION: u32 = 1;

/// Semantic column roles declared by the user for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSkillConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default)]
    pub field_mapping: FieldMapping,
    #[serde(default, deserialize_with = "lenient_filters")]
    pub default_filters: Vec<FilterExpr>,
    #[serde(default, deserialize_with = "lenient_metrics")]
    pub metrics: BTreeMap<String, MetricDefinition>,
}

impl TableSkillConfig {
    /// The configured metric the input mentions, by key or label. The
    /// longest mention wins so "net gmv" beats "gmv".
    pub fn metric_mentioned_in(&self, input: &str) -> Option<(&str, &MetricDefinition)> {
        let haystack = input.to_lowercase();
        self.metrics
            .iter()
            .filter_map(|(key, metric)| {
                let names = std::iter::once(key.as_str()).chain(metric.label.as_deref());
                names
                    .map(str::trim)
                    .filter(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
                    .map(|n| n.chars().count())
                    .max()
                    .map(|len| (len, key.as_str(), metric))
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, key, metric)| (key, metric))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSkillConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tables: BTreeMap<String, TableSkillConfig>,
}

fn default_version() -> u32 {
    SKILL_CONFIG_VERSION
}

impl Default for UserSkillConfig {
    fn default() -> Self {
        Self {
            version: SKILL_CONFIG_VERSION,
            tables: BTreeMap::new(),
        }
    }
}

impl UserSkillConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ConfigError::Invalid(format!("skill config: {e}")))?;
        if config.version > SKILL_CONFIG_VERSION {
            tracing::warn!(
                version = config.version,
                supported = SKILL_CONFIG_VERSION,
                "skill config is newer than this build; unknown fields are ignored"
            );
        }
        Ok(config)
    }

    /// Table settings, matching the name case-insensitively.
    pub fn table(&self, name: &str) -> Option<&TableSkillConfig> {
        self.tables.get(name).or_else(|| {
            self.tables
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }
}

fn lenient_filters<'de, D>(deserializer: D) -> Result<Vec<FilterExpr>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(idx, v)| match serde_json::from_value::<FilterExpr>(v) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "skipping malformed default filter");
                None
            }
        })
        .collect())
}

fn lenient_metrics<'de, D>(deserializer: D) -> Result<BTreeMap<String, MetricDefinition>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(key, v)| match serde_json::from_value::<MetricDefinition>(v) {
            Ok(m) => Some((key, m)),
            Err(e) => {
                tracing::warn!(metric = %key, error = %e, "skipping malformed metric");
                None
            }
        })
        .collect())
}

// ============================================================================
// Stores
// ============================================================================

#[async_trait]
pub trait SkillConfigStore: Send + Sync {
    async fn load(&self) -> Result<Option<UserSkillConfig>, ConfigError>;
}

/// A fixed, in-memory configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSkillConfigStore {
    config: Option<UserSkillConfig>,
}

impl StaticSkillConfigStore {
    pub fn new(config: Option<UserSkillConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SkillConfigStore for StaticSkillConfigStore {
    async fn load(&self) -> Result<Option<UserSkillConfig>, ConfigError> {
        Ok(self.config.clone())
    }
}

/// Reads a JSON file on every load. A missing file means "no config".
#[derive(Debug, Clone)]
pub struct JsonFileSkillConfigStore {
    path: PathBuf,
}

impl JsonFileSkillConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SkillConfigStore for JsonFileSkillConfigStore {
    async fn load(&self) -> Result<Option<UserSkillConfig>, ConfigError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Invalid(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        UserSkillConfig::from_json(&text).map(Some)
    }
}
