use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::models::TaskKind;

const CONFIG_FILE: &str = "config.toml";

// 配置文件结构，所有字段都有默认值，缺省时只剩下占位 provider
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub processing: ProcessingConfig,
    pub generation: GenerationConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    /// provider 的优先级顺序，占位 provider 总是排在最后
    pub order: Vec<String>,
    pub local: LocalProviderConfig,
    pub cloud: CloudProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: vec!["local".to_string(), "cloud".to_string()],
            local: LocalProviderConfig::default(),
            cloud: CloudProviderConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "mistral:7b-instruct".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CloudProviderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for CloudProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: "google/gemini-2.5-flash".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub concurrent_requests: usize,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub request_timeout_seconds: u64,
    pub max_prompt_chars: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: 4,
            request_delay_ms: 500,
            max_retries: 2,
            request_timeout_seconds: 60,
            max_prompt_chars: 16_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: MaxTokensConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: MaxTokensConfig::default(),
        }
    }
}

// 每个任务的 max_tokens 覆盖值，未设置时使用任务自带的默认值
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MaxTokensConfig {
    pub analyze_entry: Option<u32>,
    pub enrich_vocabulary: Option<u32>,
    pub explain_simply: Option<u32>,
    pub more_examples: Option<u32>,
    pub mini_quiz: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub db_file: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_file: "journal_feedback.db".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Config> {
        Self::from_path(CONFIG_FILE)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let config_content = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("配置文件 {} 无法读取: {}", path.display(), e))?;
            Self::from_toml(&config_content)?
        } else {
            warn!("配置文件 {} 不存在，使用默认配置", path.display());
            Config::default()
        };

        // API key 可以只放在环境变量里
        if config.providers.cloud.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
                info!("使用环境变量 OPENROUTER_API_KEY 作为云端 API key");
                config.providers.cloud.api_key = key;
            }
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("配置文件解析失败: {}", e))?;
        Ok(config)
    }
}

impl GenerationConfig {
    pub fn max_tokens_for(&self, kind: TaskKind) -> u32 {
        let configured = match kind {
            TaskKind::AnalyzeEntry => self.max_tokens.analyze_entry,
            TaskKind::EnrichVocabulary => self.max_tokens.enrich_vocabulary,
            TaskKind::ExplainSimply => self.max_tokens.explain_simply,
            TaskKind::MoreExamples => self.max_tokens.more_examples,
            TaskKind::MiniQuiz => self.max_tokens.mini_quiz,
        };
        configured.unwrap_or_else(|| kind.default_max_tokens())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.providers.order, vec!["local", "cloud"]);
        assert_eq!(config.processing.concurrent_requests, 4);
        assert_eq!(config.database.db_file, "journal_feedback.db");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [providers]
            order = ["cloud"]

            [providers.cloud]
            model = "mistralai/mistral-7b-instruct"

            [generation.max_tokens]
            mini_quiz = 900
            "#,
        )
        .unwrap();

        assert_eq!(config.providers.order, vec!["cloud"]);
        assert_eq!(config.providers.cloud.model, "mistralai/mistral-7b-instruct");
        assert_eq!(config.providers.cloud.base_url, "https://openrouter.ai/api/v1");
        assert!(config.providers.local.enabled);
        assert_eq!(config.generation.max_tokens_for(TaskKind::MiniQuiz), 900);
        assert_eq!(
            config.generation.max_tokens_for(TaskKind::ExplainSimply),
            TaskKind::ExplainSimply.default_max_tokens()
        );
    }

    #[test]
    fn example_config_parses() {
        let config = Config::from_toml(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.providers.local.model, "mistral:7b-instruct");
        assert_eq!(config.processing.max_prompt_chars, 16_000);
        assert_eq!(config.generation.max_tokens_for(TaskKind::AnalyzeEntry), 1500);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[providers\norder = 3").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_path(dir.path().join("nope.toml")).unwrap();
        assert!(config.providers.cloud.enabled);
    }
}
