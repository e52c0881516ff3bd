//! Skin-care consultation through the Gemini `generateContent` API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default base URL for the Gemini REST API.
pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model for consultations.
pub const DEFAULT_MODEL: &str = "gemini-flash-latest";

/// Connection timeout for API requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Question sent when a signed-in user opens the consultation page.
pub const GREETING_QUESTION: &str = "Greet the user and give brief skin-care advice.";

/// Answer used when the model returns no text.
pub const EMPTY_ANSWER: &str = "The AI did not respond.";

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

/// Answers a free-text question given the latest scan result.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, question: &str, scan_result: &str) -> Result<String, AdvisorError>;
}

/// Outcome of one consultation, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consultation {
    pub answer: Option<String>,
    pub error: Option<String>,
}

/// Ask the advisor and fold any failure into an inline error message.
pub async fn consult(advisor: Option<&dyn Advisor>, question: &str, scan_result: &str) -> Consultation {
    let result = match advisor {
        Some(advisor) => advisor.advise(question, scan_result).await,
        None => Err(AdvisorError::MissingApiKey),
    };
    match result {
        Ok(text) => Consultation {
            answer: Some(clean_answer(&text)),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "consultation failed");
            Consultation {
                answer: None,
                error: Some(format!("AI error: {e}")),
            }
        }
    }
}

/// Strip markdown emphasis and heading marks.
pub fn clean_answer(text: &str) -> String {
    let cleaned = text.replace(['*', '#'], "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        EMPTY_ANSWER.to_string()
    } else {
        cleaned.to_string()
    }
}

fn build_prompt(question: &str, scan_result: &str) -> String {
    format!(
        "You are the GlowScan skin-care assistant. Scan result: {scan_result}. \
         Question: {question}. Answer briefly and clearly."
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for the Gemini REST API.
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Result<Self, AdvisorError> {
        if api_key.is_empty() {
            return Err(AdvisorError::MissingApiKey);
        }
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl Advisor for GeminiClient {
    async fn advise(&self, question: &str, scan_result: &str) -> Result<String, AdvisorError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(build_prompt(question, scan_result)),
                }],
            }],
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(AdvisorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        tracing::debug!(model = %self.model, chars = text.len(), "consultation answered");
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Replies with fixed text, or fails when `text` is `None`.
    pub(crate) struct StubAdvisor {
        pub(crate) text: Option<String>,
    }

    #[async_trait]
    impl Advisor for StubAdvisor {
        async fn advise(&self, question: &str, scan_result: &str) -> Result<String, AdvisorError> {
            match &self.text {
                Some(text) => Ok(format!("{text} [{scan_result}] [{question}]")),
                None => Err(AdvisorError::Api {
                    status: 503,
                    message: "overloaded".into(),
                }),
            }
        }
    }

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(
            "test-key".into(),
            server.uri(),
            "test-model".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_clean_answer_strips_markdown() {
        assert_eq!(clean_answer("## Tips\n**Drink** water *daily*"), "Tips\nDrink water daily");
        assert_eq!(clean_answer("  plain  "), "plain");
        assert_eq!(clean_answer("**##**"), EMPTY_ANSWER);
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = GeminiClient::new(
            String::new(),
            GEMINI_API_BASE_URL.into(),
            DEFAULT_MODEL.into(),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(AdvisorError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_advise_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"parts": [{"text": build_prompt("How oily?", "1 face detected. Condition: Oily skin")}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "Use a "}, {"text": "**gentle** cleanser."}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server)
            .advise("How oily?", "1 face detected. Condition: Oily skin")
            .await
            .unwrap();
        assert_eq!(text, "Use a **gentle** cleanser.");
    }

    #[tokio::test]
    async fn test_advise_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).advise("q", "r").await.unwrap_err();
        assert!(matches!(err, AdvisorError::Api { status: 403, ref message } if message == "API key not valid"));
    }

    #[tokio::test]
    async fn test_advise_no_candidates_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})))
            .mount(&server)
            .await;

        assert_eq!(client(&server).advise("q", "r").await.unwrap(), "");
        let consultation = consult(Some(&client(&server)), "q", "r").await;
        assert_eq!(consultation.answer.as_deref(), Some(EMPTY_ANSWER));
    }

    #[tokio::test]
    async fn test_consult_folds_errors_inline() {
        let failing = StubAdvisor { text: None };
        let consultation = consult(Some(&failing), "q", "r").await;
        assert!(consultation.answer.is_none());
        assert_eq!(
            consultation.error.as_deref(),
            Some("AI error: API error (status 503): overloaded")
        );

        let missing = consult(None, "q", "r").await;
        assert_eq!(missing.error.as_deref(), Some("AI error: GEMINI_API_KEY is not set"));
    }

    #[tokio::test]
    async fn test_consult_cleans_answer() {
        let advisor = StubAdvisor {
            text: Some("# Hello".into()),
        };
        let consultation = consult(Some(&advisor), "hi", "No face detected").await;
        assert_eq!(consultation.answer.as_deref(), Some("Hello [No face detected] [hi]"));
        assert!(consultation.error.is_none());
    }
}
