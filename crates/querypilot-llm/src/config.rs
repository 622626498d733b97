//! Provider configuration and environment helpers.

use std::str::FromStr;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const LLM_TIMEOUT_SECS_ENV: &str = "QUERYPILOT_LLM_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("No LLM provider configured. Set OPENAI_API_KEY")]
    NoProviderConfigured,
    #[error("invalid {name}={value:?} (expected {expected})")]
    InvalidValue {
        name: String,
        value: String,
        expected: &'static str,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// LLM configuration loaded from environment or built directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var(OPENAI_API_KEY_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::NoProviderConfigured)?;
        let model = std::env::var(OPENAI_MODEL_ENV)
            .ok()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let base_url = std::env::var(OPENAI_BASE_URL_ENV)
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        let timeout_secs = env_number(LLM_TIMEOUT_SECS_ENV, DEFAULT_LLM_TIMEOUT_SECS, 1, 600)?;

        Ok(Self {
            api_key,
            model,
            base_url,
            timeout_secs,
        })
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url())
    }
}

/// Read a numeric env var: missing or blank → `default`, otherwise parsed
/// and clamped to `[min, max]`. Malformed values are an error, not a silent
/// default.
pub fn env_number<T>(name: &str, default: T, min: T, max: T) -> Result<T, ConfigError>
where
    T: FromStr + Ord + Copy,
{
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                return Ok(default);
            }
            let parsed = v.parse::<T>().map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: v.to_string(),
                expected: "integer",
            })?;
            Ok(parsed.clamp(min, max))
        }
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(ConfigError::Invalid(format!("failed to read {name}: {e}"))),
    }
}

/// Read a boolean env var (`1/true/yes/on`, `0/false/no/off`).
pub fn env_flag(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                value: other.to_string(),
                expected: "boolean",
            }),
        },
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(ConfigError::Invalid(format!("failed to read {name}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name; the process environment is shared
    // between test threads.

    #[test]
    fn env_number_defaults_parses_and_clamps() {
        let name = "QUERYPILOT_TEST_ENV_NUMBER";
        std::env::remove_var(name);
        assert_eq!(env_number(name, 7u64, 1, 10).unwrap(), 7);
        std::env::set_var(name, " 3 ");
        assert_eq!(env_number(name, 7u64, 1, 10).unwrap(), 3);
        std::env::set_var(name, "999");
        assert_eq!(env_number(name, 7u64, 1, 10).unwrap(), 10);
        std::env::set_var(name, "");
        assert_eq!(env_number(name, 7u64, 1, 10).unwrap(), 7);
        std::env::set_var(name, "lots");
        assert!(matches!(
            env_number(name, 7u64, 1, 10),
            Err(ConfigError::InvalidValue { .. })
        ));
        std::env::remove_var(name);
    }

    #[test]
    fn env_flag_accepts_common_spellings() {
        let name = "QUERYPILOT_TEST_ENV_FLAG";
        std::env::remove_var(name);
        assert!(env_flag(name, true).unwrap());
        std::env::set_var(name, "Off");
        assert!(!env_flag(name, true).unwrap());
        std::env::set_var(name, "YES");
        assert!(env_flag(name, false).unwrap());
        std::env::set_var(name, "maybe");
        assert!(env_flag(name, false).is_err());
        std::env::remove_var(name);
    }

    #[test]
    fn base_url_defaults_and_trims() {
        let cfg = LlmConfig::openai("k", "m");
        assert_eq!(
            cfg.chat_completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        let cfg = cfg.with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            cfg.chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
