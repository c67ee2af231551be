use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::QueryExecutor;
use crate::attachment::EncodedImage;
use crate::error::QueryError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    message: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    /// Build a client. A missing key is not an error here; every query will
    /// answer with the not-configured message instead.
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn query(&self, prompt: &str, image: Option<&EncodedImage>) -> Result<String, QueryError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(QueryError::NotConfigured { service: "Gemini" })?;

        let mut parts = vec![GeminiPart::Text { text: prompt }];
        if let Some(image) = image {
            let decoded = image.decode()?;
            debug!("attaching {} bytes of {}", decoded.bytes.len(), decoded.mime_type);
            parts.push(GeminiPart::InlineData {
                inline_data: InlineData {
                    mime_type: decoded.mime_type,
                    data: BASE64.encode(&decoded.bytes),
                },
            });
        }

        let request = GenerateRequest {
            contents: vec![GeminiContent { parts }],
        };

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiErrorBody>(&text)
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| format!("Gemini API error {}", status));
            return Err(QueryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let gemini_response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        Ok(gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl QueryExecutor for GeminiClient {
    async fn execute(&self, prompt: &str, image: Option<&EncodedImage>) -> Result<String, QueryError> {
        let result = self.query(prompt, image).await;
        if let Err(e) = &result {
            error!("Error calling Gemini API: {:?}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

    fn answer(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] }
            }]
        })
    }

    async fn last_request_body(server: &MockServer) -> Value {
        let requests = server.received_requests().await.unwrap();
        let request = requests.last().unwrap();
        serde_json::from_slice(&request.body).unwrap()
    }

    #[tokio::test]
    async fn test_text_only_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("Hi there!")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&server.uri(), DEFAULT_MODEL, Some("test-key".into()));
        let text = client.execute("Hello", None).await.unwrap();
        assert_eq!(text, "Hi there!");

        let body = last_request_body(&server).await;
        assert_eq!(body, json!({ "contents": [{ "parts": [{ "text": "Hello" }] }] }));
    }

    #[tokio::test]
    async fn test_image_is_sent_as_inline_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("A cat.")))
            .mount(&server)
            .await;

        let png = [0x89, b'P', b'N', b'G'];
        let image = EncodedImage::from_bytes("image/png", &png).unwrap();
        let client = GeminiClient::new(&server.uri(), DEFAULT_MODEL, Some("k".into()));
        let text = client.execute("What is this?", Some(&image)).await.unwrap();
        assert_eq!(text, "A cat.");

        let body = last_request_body(&server).await;
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "What is this?");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        let data = parts[1]["inline_data"]["data"].as_str().unwrap();
        assert_eq!(BASE64.decode(data).unwrap(), png);
    }

    #[tokio::test]
    async fn test_multiple_parts_are_joined() {
        let server = MockServer::start().await;
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello, " }, { "text": "world" }] } }]
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&server.uri(), DEFAULT_MODEL, Some("k".into()));
        assert_eq!(client.execute("hi", None).await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn test_api_error_message_surfaces() {
        let server = MockServer::start().await;
        let body = json!({ "error": { "code": 400, "message": "API key not valid." } });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(body))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&server.uri(), DEFAULT_MODEL, Some("bad".into()));
        let err = client.execute("hi", None).await.unwrap_err();
        assert!(matches!(err, QueryError::Api { status: 400, .. }));
        assert_eq!(err.to_string(), "An error occurred: API key not valid.");
    }

    #[tokio::test]
    async fn test_missing_key_never_calls_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("nope")))
            .expect(0)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&server.uri(), DEFAULT_MODEL, Some("  ".into()));
        assert!(!client.is_configured());
        let err = client.execute("hi", None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error: Gemini API key is not configured. Please contact the administrator."
        );
    }

    #[tokio::test]
    async fn test_malformed_attachment_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("nope")))
            .expect(0)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&server.uri(), DEFAULT_MODEL, Some("k".into()));
        let image = EncodedImage::from_data_url("garbage");
        let err = client.execute("hi", Some(&image)).await.unwrap_err();
        assert!(err.is_attachment());
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Nothing listens on port 9 (discard) in test environments
        let client = GeminiClient::new("http://127.0.0.1:9", DEFAULT_MODEL, Some("k".into()));
        let err = client.execute("hi", None).await.unwrap_err();
        assert!(matches!(err, QueryError::Transport(_)));
        assert!(err.to_string().starts_with("An error occurred: "));
    }
}
