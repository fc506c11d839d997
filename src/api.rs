use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{CloudProviderConfig, ProcessingConfig};
use crate::error::ProviderError;
use crate::provider::{truncate_prompt, GenerationOptions, GenerationProvider};

// OpenAI 兼容的 chat completions 响应结构
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct RequestMessage {
    pub role: String,
    pub content: String,
}

/// 云端生成 API（OpenRouter 或任何 OpenAI 兼容端点）
pub struct CloudProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
    request_delay_ms: u64,
    max_prompt_chars: usize,
    request_timeout: Duration,
}

impl CloudProvider {
    pub fn new(config: &CloudProviderConfig, processing: &ProcessingConfig) -> anyhow::Result<Self> {
        let request_timeout = Duration::from_secs(processing.request_timeout_seconds);
        let client = ClientBuilder::new().timeout(request_timeout).build()?;

        Ok(CloudProvider {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: processing.max_retries,
            request_delay_ms: processing.request_delay_ms,
            max_prompt_chars: processing.max_prompt_chars,
            request_timeout,
        })
    }

    async fn send_once(&self, request: &ChatCompletionRequest) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_text));
        }

        let api_response = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("JSON解析失败: {}", e)))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Unavailable("响应中没有 choices".to_string()))
    }
}

#[async_trait]
impl GenerationProvider for CloudProvider {
    fn name(&self) -> &str {
        "cloud"
    }

    // 带重试机制的请求，配额和认证错误不重试
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![RequestMessage {
                role: "user".to_string(),
                content: truncate_prompt(prompt, self.max_prompt_chars).into_owned(),
            }],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(self.request_delay_ms * (attempt as u64 + 1));
                info!("重试 {}/{} 次，等待 {:?}", attempt, self.max_retries, delay);
                sleep(delay).await;
            }

            match self.send_once(&request).await {
                Ok(content) => {
                    if attempt > 0 {
                        info!("重试成功");
                    }
                    return Ok(content);
                }
                Err(e) => {
                    warn!("云端请求尝试 {} 失败: {}", attempt + 1, e);
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Unavailable("所有重试都失败了".to_string())))
    }
}

pub(crate) fn map_transport_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Unavailable(format!("网络请求失败: {}", e))
    }
}

// 状态码写进消息里，方便按配额/认证分类
pub(crate) fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let label = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => "quota exceeded",
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "authentication failed",
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => "upstream timeout",
        _ => "request failed",
    };
    ProviderError::Unavailable(format!("API {} (状态码: {}): {}", label, status.as_u16(), body))
}
