use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const ENVIRONMENT_BROWSER: &str = "ENVIRONMENT_BROWSER";

/// Finish reason reported for a normal end of turn.
pub const FINISH_STOP: &str = "STOP";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API key not set")]
    MissingApiKey,
    #[error("API error: {0}")]
    Api(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall { function_call } => Some(function_call),
            _ => None,
        })
    }
}

// parts are distinguished by which field is present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<FunctionResponsePart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponsePart {
    pub inline_data: Blob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    pub fn png(data: String) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    contents: &'a [Content],
    generation_config: &'a GenerationConfig,
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Decides the next browser actions from the conversation so far.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn generate(&self, history: &[Content]) -> Result<GenerateResponse, ApiError>;
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    generation: GenerationConfig,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, generation: GenerationConfig) -> Result<Self, ApiError> {
        if api_key.trim().is_empty() {
            return Err(ApiError::MissingApiKey);
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            model,
            generation,
        })
    }

    fn tools() -> Vec<serde_json::Value> {
        vec![serde_json::json!({
            "computerUse": {
                "environment": ENVIRONMENT_BROWSER
            }
        })]
    }
}

#[async_trait]
impl ReasoningEngine for GeminiClient {
    async fn generate(&self, history: &[Content]) -> Result<GenerateResponse, ApiError> {
        let request = ApiRequest {
            contents: history,
            generation_config: &self.generation,
            tools: Self::tools(),
        };

        let url = format!("{GEMINI_API_URL}/{}:generateContent", self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // try to parse error
            if let Ok(err) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(ApiError::Api(err.error.message));
            }
            return Err(ApiError::Api(format!("HTTP {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate_parts() {
        let body = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "I will open the page."},
                        {"functionCall": {"name": "navigate", "args": {"url": "https://example.com"}}}
                    ]
                },
                "finishReason": "STOP"
            }]
        }"#;
        let resp: GenerateResponse = serde_json::from_str(body).unwrap();
        let candidate = &resp.candidates[0];
        assert_eq!(candidate.finish_reason.as_deref(), Some(FINISH_STOP));

        let content = candidate.content.as_ref().unwrap();
        assert_eq!(content.text(), "I will open the page.");
        let calls: Vec<_> = content.function_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "navigate");
        assert_eq!(calls[0].args["url"], "https://example.com");
    }

    #[test]
    fn test_function_response_wire_shape() {
        let part = Part::FunctionResponse {
            function_response: FunctionResponse {
                name: "click_at".to_string(),
                response: serde_json::json!({"url": "https://example.com"}),
                parts: vec![FunctionResponsePart {
                    inline_data: Blob::png("AAAA".to_string()),
                }],
            },
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["functionResponse"]["name"], "click_at");
        assert_eq!(value["functionResponse"]["response"]["url"], "https://example.com");
        assert_eq!(
            value["functionResponse"]["parts"][0]["inlineData"]["mimeType"],
            "image/png"
        );
    }

    #[test]
    fn test_empty_response_has_no_candidates() {
        let resp: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.candidates.is_empty());
    }

    #[test]
    fn test_missing_key_rejected() {
        let generation = GenerationConfig {
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
        };
        assert!(matches!(
            GeminiClient::new(String::new(), "m".to_string(), generation),
            Err(ApiError::MissingApiKey)
        ));
    }
}
