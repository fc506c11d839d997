use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::api::{map_transport_error, status_error};
use crate::config::{LocalProviderConfig, ProcessingConfig};
use crate::error::ProviderError;
use crate::provider::{truncate_prompt, GenerationOptions, GenerationProvider};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct LocalProvider {
    client: Client,
    base_url: String,
    model: String,
    max_prompt_chars: usize,
    request_timeout: Duration,
}

impl LocalProvider {
    pub fn new(config: &LocalProviderConfig, processing: &ProcessingConfig) -> anyhow::Result<Self> {
        let request_timeout = Duration::from_secs(processing.request_timeout_seconds);
        let client = ClientBuilder::new().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_prompt_chars: processing.max_prompt_chars,
            request_timeout,
        })
    }

    fn build_request(&self, prompt: &str, options: &GenerationOptions) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: truncate_prompt(prompt, self.max_prompt_chars).into_owned(),
            }],
            stream: false,
            options: ChatOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }
}

#[async_trait]
impl GenerationProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = self.build_request(prompt, options);
        debug!("调用本地模型 {} ({})", self.model, url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            // 模型未下载时 Ollama 返回 404 "model not found"
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_text));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("本地模型响应解析失败: {}", e)))?;

        if let Some(error) = body.error {
            return Err(ProviderError::Unavailable(format!("本地模型错误: {}", error)));
        }

        body.message
            .map(|m| m.content)
            .ok_or_else(|| ProviderError::Unavailable("本地模型响应中没有 message".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskKind;
    use crate::test_server::StubServer;

    fn provider_for(server: &StubServer) -> LocalProvider {
        let config = LocalProviderConfig {
            base_url: server.base_url.clone(),
            model: "mistral:7b-instruct".to_string(),
            ..Default::default()
        };
        let processing = ProcessingConfig { request_timeout_seconds: 5, ..Default::default() };
        LocalProvider::new(&config, &processing).unwrap()
    }

    #[tokio::test]
    async fn chat_reply_is_returned() {
        let server = StubServer::start(
            200,
            r#"{"model":"mistral:7b-instruct","message":{"role":"assistant","content":"Hola"},"done":true}"#,
        )
        .await;
        let options = GenerationOptions { task: TaskKind::ExplainSimply, max_tokens: 77, temperature: 0.2 };

        let text = provider_for(&server).generate("hola", &options).await.unwrap();

        assert_eq!(text, "Hola");
        assert_eq!(server.hits(), 1);
        let request = server.last_request();
        assert!(request.contains("POST /api/chat"));
        assert!(request.contains(r#""num_predict":77"#));
        assert!(request.contains(r#""stream":false"#));
    }

    #[tokio::test]
    async fn missing_model_is_unavailable() {
        let server = StubServer::start(404, r#"{"error":"model 'mistral:7b-instruct' not found"}"#).await;
        let options = GenerationOptions { task: TaskKind::MiniQuiz, max_tokens: 10, temperature: 0.2 };

        let err = provider_for(&server).generate("hola", &options).await.unwrap_err();

        assert!(matches!(err, ProviderError::Unavailable(ref msg) if msg.contains("not found")));
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn request_carries_generation_options() {
        let provider = LocalProvider::new(
            &LocalProviderConfig {
                base_url: "http://localhost:11434/".to_string(),
                ..Default::default()
            },
            &ProcessingConfig { max_prompt_chars: 5, ..Default::default() },
        )
        .unwrap();
        let options = GenerationOptions { task: TaskKind::MiniQuiz, max_tokens: 321, temperature: 0.2 };

        let request = provider.build_request("abcdefgh", &options);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 321);
        assert_eq!(json["messages"][0]["content"], "abcde");
    }

    #[test]
    fn error_body_is_recognized() {
        let body: ChatResponse = serde_json::from_str(r#"{"error":"model 'x' not found"}"#).unwrap();
        assert!(body.message.is_none());
        assert_eq!(body.error.as_deref(), Some("model 'x' not found"));
    }
}
