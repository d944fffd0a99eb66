//! OpenAI-compatible chat-completions client.
//!
//! All settings come from an explicit [`ProviderConfig`]; the client never
//! reads or mutates process environment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ChatRole, GenerationRequest, ProviderError, TextGenerator};
use crate::config::ProviderConfig;

/// HTTP text generator speaking the `/v1/chat/completions` dialect.
#[derive(Debug, Clone)]
pub struct HttpTextGenerator {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

impl HttpTextGenerator {
    /// Build a client from explicit configuration.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> WireRequest<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: &request.system_prompt,
        });
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: wire_role(m.role),
            content: &m.content,
        }));
        WireRequest {
            model: &self.config.model,
            messages,
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens.or(self.config.max_tokens),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let mut builder = self.client.post(&self.config.endpoint).json(&self.body(&request));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    after_secs: self.config.timeout_secs,
                }
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Quota(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("response contained no choices".to_string()))?;
        debug!(chars = text.len(), "generation completed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    #[test]
    fn test_body_prepends_system_prompt() {
        let generator = HttpTextGenerator::new(ProviderConfig::default()).unwrap();
        let mut request = GenerationRequest::new("be brief", "hello");
        request.messages.push(ChatMessage::assistant("hi"));

        let body = serde_json::to_value(generator.body(&request)).unwrap();
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_request_overrides_config_temperature() {
        let config = ProviderConfig {
            temperature: Some(0.2),
            ..ProviderConfig::default()
        };
        let generator = HttpTextGenerator::new(config).unwrap();
        let request = GenerationRequest::new("s", "u").with_temperature(0.9);
        let body = serde_json::to_value(generator.body(&request)).unwrap();
        assert!((body["temperature"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }
}
