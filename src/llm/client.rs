use crate::error::{ComparatorError, Result};
use crate::extraction::{ExtractionRequest, ExtractionService};
use crate::llm::prompts::system_prompt;
use crate::llm::types::*;
use crate::llm::utils::{clean_json_output, gemini_schema};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini `generateContent` client that answers extraction requests with JSON.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_key, model, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Client whose every HTTP request is abandoned after `timeout`.
    pub fn with_timeout(
        api_key: String,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    /// Reads the key from `GEMINI_API_KEY` and uses the default model.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            ComparatorError::InvalidConfig("GEMINI_API_KEY is not set".to_string())
        })?;
        if api_key.trim().is_empty() {
            return Err(ComparatorError::InvalidConfig(
                "GEMINI_API_KEY is empty".to_string(),
            ));
        }
        Self::new(api_key, DEFAULT_MODEL)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) async fn generate_content(
        &self,
        system_prompt: &str,
        messages: Vec<Content>,
        response_schema: Option<Value>,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents: messages,
            system_instruction: Some(Content::user(system_prompt)),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema,
            },
        };

        let res = self.client.post(&url).json(&payload).send().await?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(ComparatorError::ExtractionFailed(format!(
                "Gemini API Error (status {}): {}",
                status, err_text
            )));
        }

        let body: GenerateContentResponse = res.json().await?;

        let text = body
            .candidates
            .ok_or_else(|| ComparatorError::ExtractionFailed("No candidates returned".to_string()))?
            .first()
            .ok_or_else(|| ComparatorError::ExtractionFailed("Empty candidates list".to_string()))?
            .content
            .parts
            .first()
            .ok_or_else(|| ComparatorError::ExtractionFailed("No parts in content".to_string()))?
            .clone();

        match text {
            Part::Text { text } => Ok(text),
            _ => Err(ComparatorError::ExtractionFailed(
                "Model returned non-text content".to_string(),
            )),
        }
    }
}

/// Renders the request as the single user turn sent to the model.
pub fn user_message(request: &ExtractionRequest) -> Result<String> {
    let mut message = format!(
        "{}\n\nПродукт: {}\nБанки: {}\n",
        request.instructions,
        request.product_type.display_name(),
        request.target_entities.join(", ")
    );
    for (i, payload) in request.raw_payloads.iter().enumerate() {
        message.push_str(&format!(
            "\n### Данные {}\n{}\n",
            i + 1,
            serde_json::to_string_pretty(payload)?
        ));
    }
    Ok(message)
}

#[async_trait]
impl ExtractionService for GeminiClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Value> {
        info!(
            "Gemini {} extraction for {} ({} payloads)",
            self.model,
            request.target_entities.join(", "),
            request.raw_payloads.len()
        );

        let message = user_message(request)?;
        let raw = self
            .generate_content(
                system_prompt(request.task),
                vec![Content::user(message)],
                Some(gemini_schema(&request.output_contract)),
            )
            .await?;
        debug!("Gemini returned {} chars", raw.len());

        serde_json::from_str(&clean_json_output(&raw)).map_err(|e| {
            ComparatorError::ExtractionFailed(format!("model reply is not JSON: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionTask;
    use crate::schema::ProductType;
    use serde_json::json;

    #[test]
    fn test_user_message_lists_entities_and_payloads() {
        let request = ExtractionRequest {
            task: ExtractionTask::ProductRecord,
            product_type: ProductType::CreditCard,
            target_entities: vec!["Сбербанк".to_string()],
            raw_payloads: vec![json!({"snippet_text": "ставка 25.9%"})],
            instructions: "Извлеки условия.".to_string(),
            output_contract: json!({"type": "object"}),
        };
        let message = user_message(&request).unwrap();
        assert!(message.starts_with("Извлеки условия."));
        assert!(message.contains("Банки: Сбербанк"));
        assert!(message.contains("### Данные 1"));
        assert!(message.contains("ставка 25.9%"));
    }

    #[test]
    fn test_client_keeps_model() {
        let client = GeminiClient::new("key".to_string(), "gemini-test")
            .unwrap()
            .with_base_url("http://localhost:1");
        assert_eq!(client.model(), "gemini-test");
    }
}
