use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::api::CloudProvider;
use crate::config::{Config, ProcessingConfig};
use crate::error::ProviderError;
use crate::local::LocalProvider;
use crate::models::TaskKind;
use crate::stub::StubProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// 让占位 provider 知道要生成哪种占位内容，其他 provider 忽略
    pub task: TaskKind,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationOptions {
    pub fn for_task(task: TaskKind, config: &Config) -> Self {
        Self {
            task,
            max_tokens: config.generation.max_tokens_for(task),
            temperature: config.generation.temperature,
        }
    }
}

/// 把 prompt 变成原始文本的后端
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, ProviderError>;
}

/// 一次生成的结果以及产生它的 provider
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub provider: String,
    /// 来自占位 provider
    pub placeholder: bool,
}

// 超长 prompt 按字符截断（不会切开 UTF-8 字符）
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed(prompt);
    }
    match prompt.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            warn!("prompt 超过 {} 个字符，已截断", max_chars);
            Cow::Owned(prompt[..byte_index].to_string())
        }
        None => Cow::Borrowed(prompt),
    }
}

// 单个 provider 调用的总时限，要覆盖云端 provider 的全部重试
fn call_timeout(processing: &ProcessingConfig) -> Duration {
    let attempts = processing.max_retries as u64 + 1;
    let per_attempt = Duration::from_secs(processing.request_timeout_seconds.max(1));
    let retry_delays: u64 = (1..attempts).map(|attempt| processing.request_delay_ms * (attempt + 1)).sum();
    per_attempt * attempts as u32 + Duration::from_millis(retry_delays)
}

pub struct ProviderChain {
    providers: Vec<Arc<dyn GenerationProvider>>,
    fallback: StubProvider,
    call_timeout: Duration,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn GenerationProvider>>, call_timeout: Duration) -> Self {
        Self {
            providers,
            fallback: StubProvider,
            call_timeout,
        }
    }

    /// 只有占位 provider 的链
    pub fn offline() -> Self {
        Self::new(Vec::new(), Duration::from_secs(1))
    }

    /// 按 `providers.order` 构造 provider 链
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut providers: Vec<Arc<dyn GenerationProvider>> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for name in &config.providers.order {
            let name = name.trim().to_lowercase();
            if !seen.insert(name.clone()) {
                continue;
            }
            match name.as_str() {
                "local" => {
                    if config.providers.local.enabled {
                        providers.push(Arc::new(LocalProvider::new(
                            &config.providers.local,
                            &config.processing,
                        )?));
                    } else {
                        info!("本地模型 provider 已禁用");
                    }
                }
                "cloud" => {
                    let cloud = &config.providers.cloud;
                    if !cloud.enabled {
                        info!("云端 provider 已禁用");
                    } else if cloud.api_key.trim().is_empty() {
                        warn!("云端 provider 没有配置 API key，跳过");
                    } else {
                        providers.push(Arc::new(CloudProvider::new(cloud, &config.processing)?));
                    }
                }
                // 占位 provider 总是最后一个
                "stub" => {}
                other => warn!("未知的 provider: {}，跳过", other),
            }
        }

        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        info!("provider 顺序: {:?} -> stub", names);

        Ok(Self::new(providers, call_timeout(&config.processing)))
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// 依次尝试每个 provider，全部失败时返回占位内容
    pub async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Generation {
        for provider in &self.providers {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.call_timeout, provider.generate(prompt, options)).await {
                Ok(Ok(text)) if text.trim().is_empty() => {
                    Err(ProviderError::Unavailable("empty response".to_string()))
                }
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.call_timeout)),
            };

            match outcome {
                Ok(text) => {
                    info!(
                        provider = provider.name(),
                        task = %options.task,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "生成成功"
                    );
                    debug!(provider = provider.name(), "原始输出: {}", text);
                    return Generation {
                        text,
                        provider: provider.name().to_string(),
                        placeholder: false,
                    };
                }
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        task = %options.task,
                        reason = %e.classify(),
                        "provider 失败，切换到下一个: {}",
                        e
                    );
                }
            }
        }

        warn!(task = %options.task, "所有 provider 都不可用，使用占位内容");
        Generation {
            text: self.fallback.placeholder(options.task),
            provider: self.fallback.name().to_string(),
            placeholder: true,
        }
    }
}
