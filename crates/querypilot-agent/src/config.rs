//! Agent configuration.

use std::time::Duration;

use querypilot_llm::{env_flag, env_number, ConfigError};
use serde::{Deserialize, Serialize};

pub const MAX_ROWS_ENV: &str = "QUERYPILOT_MAX_ROWS";
pub const MAX_DURATION_MS_ENV: &str = "QUERYPILOT_MAX_DURATION_MS";
pub const DIGEST_MAX_CHARS_ENV: &str = "QUERYPILOT_DIGEST_MAX_CHARS";
pub const TABLE_PATTERN_ENV: &str = "QUERYPILOT_TABLE_PATTERN";
pub const MOCK_ENV: &str = "QUERYPILOT_MOCK";
pub const ROUTER_LLM_ENV: &str = "QUERYPILOT_ROUTER_LLM";

pub const DEFAULT_MAX_ROWS: usize = 500;
pub const DEFAULT_MAX_DURATION_MS: u64 = 60_000;
pub const DEFAULT_DIGEST_MAX_CHARS: usize = 4_000;
pub const DEFAULT_TABLE_PATTERN: &str = "main_table%";

/// Confidence bands for the keyword router.
///
/// The values were tuned by hand against labelled questions; the router
/// tests pin them, so change them together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterThresholds {
    /// Exactly one keyword matched.
    pub single_keyword: f64,
    /// Two or more keywords matched, total weight below `strong_score`.
    pub multiple_weak: f64,
    /// Total weight reached `strong_score`.
    pub strong_multi: f64,
    /// A primary keyword plus a business-domain term.
    pub keyword_and_domain: f64,
    pub strong_score: u32,
    /// Below this, ask the model (if one is available).
    pub llm_fallback_below: f64,
    /// Minimum confidence to take the template path.
    pub template_min: f64,
}

impl Default for RouterThresholds {
    fn default() -> Self {
        Self {
            single_keyword: 0.6,
            multiple_weak: 0.75,
            strong_multi: 0.9,
            keyword_and_domain: 1.0,
            strong_score: 4,
            llm_fallback_below: 0.7,
            template_min: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub max_rows: usize,
    pub max_duration_ms: u64,
    pub digest_max_chars: usize,
    /// `LIKE` pattern for auto-discovering tables when none are attached.
    pub table_pattern: String,
    /// Test/offline mode: auto-repair is skipped.
    pub mock_mode: bool,
    /// Allow the router's model fallback.
    pub router_llm: bool,
    pub thresholds: RouterThresholds,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_duration_ms: DEFAULT_MAX_DURATION_MS,
            digest_max_chars: DEFAULT_DIGEST_MAX_CHARS,
            table_pattern: DEFAULT_TABLE_PATTERN.to_string(),
            mock_mode: false,
            router_llm: true,
            thresholds: RouterThresholds::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let table_pattern = std::env::var(TABLE_PATTERN_ENV)
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_TABLE_PATTERN.to_string());

        Ok(Self {
            max_rows: env_number(MAX_ROWS_ENV, DEFAULT_MAX_ROWS, 1, 100_000)?,
            max_duration_ms: env_number(MAX_DURATION_MS_ENV, DEFAULT_MAX_DURATION_MS, 100, 3_600_000)?,
            digest_max_chars: env_number(DIGEST_MAX_CHARS_ENV, DEFAULT_DIGEST_MAX_CHARS, 200, 64_000)?,
            table_pattern,
            mock_mode: env_flag(MOCK_ENV, false)?,
            router_llm: env_flag(ROUTER_LLM_ENV, true)?,
            thresholds: RouterThresholds::default(),
        })
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn with_max_duration_ms(mut self, ms: u64) -> Self {
        self.max_duration_ms = ms;
        self
    }

    pub fn with_mock_mode(mut self, mock: bool) -> Self {
        self.mock_mode = mock;
        self
    }

    pub fn with_router_llm(mut self, enabled: bool) -> Self {
        self.router_llm = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_pinned() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_rows, 500);
        assert_eq!(cfg.max_duration_ms, 60_000);
        assert_eq!(cfg.digest_max_chars, 4_000);
        assert_eq!(cfg.table_pattern, "main_table%");
        assert!(!cfg.mock_mode);

        let t = RouterThresholds::default();
        assert_eq!(
            (t.single_keyword, t.multiple_weak, t.strong_multi, t.keyword_and_domain),
            (0.6, 0.75, 0.9, 1.0)
        );
        assert_eq!(t.llm_fallback_below, 0.7);
        assert_eq!(t.template_min, 0.6);
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let cfg: AgentConfig =
            serde_json::from_str(r#"{"maxRows": 50, "thresholds": {"templateMin": 0.8}}"#).unwrap();
        assert_eq!(cfg.max_rows, 50);
        assert_eq!(cfg.max_duration_ms, DEFAULT_MAX_DURATION_MS);
        assert_eq!(cfg.thresholds.template_min, 0.8);
        assert_eq!(cfg.thresholds.single_keyword, 0.6);
    }
}
