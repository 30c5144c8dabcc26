/// HTTP-backed generation services.
///
/// Three wire formats are supported: OpenAI chat-completions, the Anthropic
/// messages API, and any OpenAI-compatible endpoint without authentication
/// (`custom`, e.g. a local inference server).
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{GenerationError, Message, Role, TextGenerator};
use crate::config::ServiceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Claude,
    Custom,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, GenerationError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "claude" | "anthropic" => Ok(Provider::Claude),
            "custom" => Ok(Provider::Custom),
            other => Err(GenerationError::Unsupported(other.to_string())),
        }
    }

    fn default_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
            Provider::Claude => "https://api.anthropic.com/v1/messages",
            Provider::Custom => "http://127.0.0.1:5000/v1/chat/completions",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4-turbo",
            Provider::Claude => "claude-3-sonnet-20240229",
            Provider::Custom => "",
        }
    }

    fn key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Claude => Some("ANTHROPIC_API_KEY"),
            Provider::Custom => None,
        }
    }
}

pub struct HttpGenerator {
    client: Client,
    provider: Provider,
    url: String,
    api_key: String,
    model: String,
    api_version: String,
}

impl HttpGenerator {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, GenerationError> {
        let provider = Provider::parse(&config.provider)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("codeshift/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GenerationError::Transport(format!("HTTP client build failed: {e}")))?;

        let api_key = if config.api_key.is_empty() {
            provider
                .key_env_var()
                .and_then(|var| std::env::var(var).ok())
                .unwrap_or_default()
        } else {
            config.api_key.clone()
        };

        Ok(Self {
            client,
            provider,
            url: non_empty_or(&config.api_url, provider.default_url()),
            api_key,
            model: non_empty_or(&config.model, provider.default_model()),
            api_version: non_empty_or(&config.api_version, "2023-06-01"),
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn request_body(&self, conversation: &[Message], max_tokens: usize) -> Value {
        match self.provider {
            Provider::OpenAi => json!({
                "model": self.model,
                "messages": openai_messages(conversation),
                "max_tokens": max_tokens,
                "temperature": 0.7,
            }),
            Provider::Custom => {
                let mut body = json!({
                    "messages": openai_messages(conversation),
                    "max_tokens": max_tokens,
                });
                if !self.model.is_empty() {
                    body["model"] = json!(self.model);
                }
                body
            }
            Provider::Claude => {
                let system: Vec<&str> = conversation
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(|m| m.content.as_str())
                    .collect();
                let messages: Vec<Value> = conversation
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                    .collect();
                let mut body = json!({
                    "model": self.model,
                    "messages": messages,
                    "max_tokens": max_tokens,
                });
                if !system.is_empty() {
                    body["system"] = json!(system.join("\n\n"));
                }
                body
            }
        }
    }
}

impl TextGenerator for HttpGenerator {
    fn generate(
        &self,
        conversation: &[Message],
        max_tokens: usize,
    ) -> Result<String, GenerationError> {
        let body = self.request_body(conversation, max_tokens);
        debug!(
            "POST {} ({} messages, max_tokens={max_tokens})",
            self.url,
            conversation.len()
        );

        let mut request = self.client.post(&self.url).json(&body);
        request = match self.provider {
            Provider::OpenAi => request.bearer_auth(&self.api_key),
            Provider::Claude => request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.api_version),
            Provider::Custom => request,
        };

        let resp = request
            .send()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let value: Value =
            serde_json::from_str(&text).map_err(|e| GenerationError::Malformed(e.to_string()))?;
        extract_reply(self.provider, &value)
    }
}

fn openai_messages(conversation: &[Message]) -> Vec<Value> {
    conversation
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

/// Pull the reply text out of a provider response body.
fn extract_reply(provider: Provider, value: &Value) -> Result<String, GenerationError> {
    let reply = match provider {
        Provider::OpenAi | Provider::Custom => value["choices"]
            .as_array()
            .and_then(|choices| {
                choices
                    .iter()
                    .map(|c| &c["message"])
                    .find(|m| m["role"].as_str().is_none_or(|r| r == "assistant"))
            })
            .and_then(|m| m["content"].as_str()),
        Provider::Claude => value["content"]
            .as_array()
            .and_then(|blocks| blocks.iter().find_map(|b| b["text"].as_str())),
    };

    reply
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Malformed("no reply text in response".to_string()))
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> ServiceConfig {
        ServiceConfig {
            provider: provider.to_string(),
            api_key: "k".to_string(),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("OpenAI").unwrap(), Provider::OpenAi);
        assert_eq!(Provider::parse("claude").unwrap(), Provider::Claude);
        assert_eq!(Provider::parse("custom").unwrap(), Provider::Custom);
        assert!(matches!(
            Provider::parse("bard"),
            Err(GenerationError::Unsupported(_))
        ));
    }

    #[test]
    fn test_claude_body_lifts_system() {
        let generator = HttpGenerator::from_config(&config("claude")).unwrap();
        let body = generator.request_body(
            &[Message::system("be terse"), Message::user("hello")],
            100,
        );
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn test_custom_body_omits_empty_model() {
        let generator = HttpGenerator::from_config(&config("custom")).unwrap();
        let body = generator.request_body(&[Message::user("x")], 10);
        assert!(body.get("model").is_none());
    }

    #[test]
    fn test_extract_openai_reply() {
        let value = json!({
            "choices": [{ "message": { "role": "assistant", "content": "done" } }]
        });
        assert_eq!(extract_reply(Provider::OpenAi, &value).unwrap(), "done");
    }

    #[test]
    fn test_extract_claude_reply() {
        let value = json!({ "content": [{ "type": "text", "text": "ok" }] });
        assert_eq!(extract_reply(Provider::Claude, &value).unwrap(), "ok");
    }

    #[test]
    fn test_extract_missing_reply() {
        let value = json!({ "choices": [] });
        assert!(matches!(
            extract_reply(Provider::OpenAi, &value),
            Err(GenerationError::Malformed(_))
        ));
    }
}
