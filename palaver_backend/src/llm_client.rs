use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PalaverConfig;
use crate::http_client::build_http_client_with_timeout;
use crate::model::{Classifier, Completion, ModelClass, ReplyContent};

/// Model names per class.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTiers {
    pub small: String,
    pub medium: String,
    pub large: String,
}

impl ModelTiers {
    /// Per-class overrides from config, falling back to `llm_model`.
    pub fn from_config(config: &PalaverConfig) -> Self {
        let pick = |tier: &Option<String>| {
            tier.as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(&config.llm_model)
                .to_string()
        };
        Self {
            small: pick(&config.model_small),
            medium: pick(&config.model_medium),
            large: pick(&config.model_large),
        }
    }

    pub fn model_for(&self, class: ModelClass) -> &str {
        match class {
            ModelClass::Small => &self.small,
            ModelClass::Medium => &self.medium,
            ModelClass::Large => &self.large,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    models: ModelTiers,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: String, models: ModelTiers) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            models,
            client: build_http_client_with_timeout(Some(Duration::from_secs(120)))?,
        })
    }

    pub fn from_config(config: &PalaverConfig) -> Result<Self> {
        Self::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone().unwrap_or_default(),
            ModelTiers::from_config(config),
        )
    }

    /// Generate a completion using the OpenAI API format
    pub async fn generate_with_model(
        &self,
        messages: Vec<Message>,
        model: &str,
        max_tokens: u32,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(max_tokens),
        };

        let mut req = self.client.post(&url).json(&request);

        // Local models need no key
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }

    async fn complete(&self, context: &str, class: ModelClass, max_tokens: u32) -> Result<String> {
        let model = self.models.model_for(class);
        tracing::debug!("LLM request: model={} class={:?}", model, class);
        let messages = vec![Message {
            role: "user".to_string(),
            content: context.to_string(),
        }];
        self.generate_with_model(messages, model, max_tokens).await
    }
}

#[async_trait]
impl Classifier for LlmClient {
    async fn decide(&self, context: &str, model_class: ModelClass) -> Result<String> {
        let raw = self.complete(context, model_class, 16).await?;
        Ok(normalize_should_respond(&raw))
    }
}

#[async_trait]
impl Completion for LlmClient {
    async fn generate(
        &self,
        context: &str,
        model_class: ModelClass,
    ) -> Result<Option<ReplyContent>> {
        let raw = self.complete(context, model_class, 2000).await?;
        let parsed = parse_reply_content(&raw);
        if parsed.is_none() {
            tracing::warn!(
                "Unusable completion: {}",
                raw.chars().take(200).collect::<String>()
            );
        }
        Ok(parsed)
    }
}

/// Pull the first participation token out of a free-form classifier answer.
/// Answers without one come back trimmed and otherwise untouched.
pub fn normalize_should_respond(raw: &str) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN.get_or_init(|| {
        Regex::new(r"\b(RESPOND|IGNORE|STOP)\b").expect("valid participation token regex")
    });
    let cleaned = strip_think(raw);
    let upper = cleaned.to_uppercase();
    match re.find(&upper) {
        Some(m) => m.as_str().to_string(),
        None => cleaned.trim().to_string(),
    }
}

/// Parse a completion into reply content.
///
/// Accepts bare JSON, a ```json fenced block, or the outermost `{...}`.
/// A reply with blank text counts as nothing.
pub fn parse_reply_content(response: &str) -> Option<ReplyContent> {
    let reply = parse_json::<ReplyContent>(response).ok()?;
    if reply.text.trim().is_empty() {
        None
    } else {
        Some(reply)
    }
}

fn strip_think(response: &str) -> &str {
    match response.rfind("</think>") {
        Some(end) => &response[end + "</think>".len()..],
        None => response,
    }
}

fn parse_json<T>(response: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if let Ok(parsed) = serde_json::from_str::<T>(response) {
        return Ok(parsed);
    }

    let cleaned = strip_think(response);
    if let Ok(parsed) = serde_json::from_str::<T>(cleaned.trim()) {
        return Ok(parsed);
    }

    let json_content = if let Some(start) = cleaned.find("```json") {
        let after_start = &cleaned[start + 7..];
        if let Some(end) = after_start.find("```") {
            after_start[..end].trim()
        } else {
            cleaned
        }
    } else if let Some(start) = cleaned.find('{') {
        if let Some(end) = cleaned.rfind('}') {
            &cleaned[start..=end]
        } else {
            cleaned
        }
    } else {
        cleaned
    };

    serde_json::from_str::<T>(json_content.trim()).context(format!(
        "Failed to parse JSON. Extracted: {} | Original: {}",
        json_content,
        response.chars().take(500).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_answers_are_reduced_to_a_token() {
        assert_eq!(normalize_should_respond("RESPOND"), "RESPOND");
        assert_eq!(normalize_should_respond("  [IGNORE]\n"), "IGNORE");
        assert_eq!(normalize_should_respond("I think we should respond."), "RESPOND");
        assert_eq!(
            normalize_should_respond("<think>maybe STOP?</think>ignore"),
            "IGNORE"
        );
        assert_eq!(normalize_should_respond("  perhaps  "), "perhaps");
    }

    #[test]
    fn reply_content_is_found_in_common_wrappings() {
        let bare = r#"{"text": "hi there", "action": "NONE"}"#;
        let fenced = "Sure!\n```json\n{\"text\": \"fenced\"}\n```";
        let inline = "Here it is: {\"text\": \"inline\"} hope that helps";
        let thinking = "<think>{\"text\": \"no\"}</think>{\"text\": \"after\"}";

        assert_eq!(
            parse_reply_content(bare),
            Some(ReplyContent {
                text: "hi there".to_string(),
                action: Some("NONE".to_string()),
            })
        );
        assert_eq!(parse_reply_content(fenced).unwrap().text, "fenced");
        assert_eq!(parse_reply_content(inline).unwrap().text, "inline");
        assert_eq!(parse_reply_content(thinking).unwrap().text, "after");
    }

    #[test]
    fn blank_or_unparseable_completions_are_nothing() {
        assert_eq!(parse_reply_content(r#"{"text": "   "}"#), None);
        assert_eq!(parse_reply_content("just words"), None);
        assert_eq!(parse_reply_content(""), None);
    }

    #[test]
    fn model_tiers_fall_back_to_the_default_model() {
        let config = PalaverConfig {
            llm_model: "base".to_string(),
            model_small: Some("tiny".to_string()),
            model_large: Some(" ".to_string()),
            ..Default::default()
        };

        let tiers = ModelTiers::from_config(&config);

        assert_eq!(tiers.model_for(ModelClass::Small), "tiny");
        assert_eq!(tiers.model_for(ModelClass::Medium), "base");
        assert_eq!(tiers.model_for(ModelClass::Large), "base");
    }
}
