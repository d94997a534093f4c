//! Client for the chat-completion API that explains a diagnosis.
//!
//! `Advisor::details` never fails: every error is logged and replaced by a
//! static fallback so a prediction page can always be rendered.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::labels::prompt_name;

const NO_DESCRIPTION: &str = "No description available.";
const NO_TREATMENTS: &str = "No treatments available.";

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AdvisorError {
    fn is_retryable(&self) -> bool {
        match self {
            AdvisorError::Transport(_) => true,
            AdvisorError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Description and treatment steps shown next to a prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct DiseaseDetails {
    pub description: String,
    /// HTML `<ul>` fragment.
    pub treatments: String,
}

impl DiseaseDetails {
    fn new(description: &str, treatments: &str) -> Self {
        Self {
            description: description.to_string(),
            treatments: treatments.to_string(),
        }
    }

    /// Placeholder content for each failure kind.
    pub fn fallback(err: &AdvisorError) -> Self {
        match err {
            AdvisorError::MissingApiKey => Self::new(
                "Description unavailable. Please set OPENROUTER_API_KEY to fetch details.",
                "<ul><li>Set OPENROUTER_API_KEY</li><li>Restart the application</li><li>Try again</li></ul>",
            ),
            AdvisorError::Status { .. } => Self::new(
                "Could not fetch details from AI.",
                "<ul><li>Check network connection</li><li>Verify API Key</li></ul>",
            ),
            AdvisorError::Malformed(_) => Self::new(
                "The knowledge base returned an unreadable answer.",
                "<ul><li>Try scanning the leaf again</li></ul>",
            ),
            AdvisorError::Transport(_) => Self::new(
                "Error connecting to knowledge base.",
                "<ul><li>System Error</li></ul>",
            ),
        }
    }
}

/// Scalars other than strings are kept in their JSON form; null counts as absent.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

impl DiseaseDetails {
    /// Best-effort reading of the `{description, treatments}` object the
    /// prompt asks for. Only a non-object reply is rejected.
    fn from_reply(reply: &Value) -> Result<Self, AdvisorError> {
        let fields = reply
            .as_object()
            .ok_or_else(|| AdvisorError::Malformed(format!("expected a JSON object, got {}", reply)))?;

        let description = fields
            .get("description")
            .and_then(text_of)
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());

        let treatments = match fields.get("treatments") {
            Some(Value::Array(steps)) => {
                let items: String = steps
                    .iter()
                    .filter_map(text_of)
                    .map(|step| format!("<li>{}</li>", crate::pages::escape(&step)))
                    .collect();
                format!("<ul>{}</ul>", items)
            }
            Some(Value::String(html)) => html.clone(),
            Some(other) => text_of(other)
                .map(|text| crate::pages::escape(&text))
                .unwrap_or_else(|| NO_TREATMENTS.to_string()),
            None => NO_TREATMENTS.to_string(),
        };

        Ok(Self {
            description,
            treatments,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u8,
}

#[derive(Clone)]
pub struct Advisor {
    client: reqwest::Client,
    config: AdvisorConfig,
}

impl Advisor {
    pub fn new(config: AdvisorConfig) -> Result<Self, AdvisorError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Looks up `label`, degrading to a fallback on any failure.
    pub async fn details(&self, label: &str) -> DiseaseDetails {
        match self.fetch(label).await {
            Ok(details) => details,
            Err(err @ AdvisorError::MissingApiKey) => DiseaseDetails::fallback(&err),
            Err(err) => {
                tracing::warn!(%label, error = %err, "knowledge lookup failed");
                DiseaseDetails::fallback(&err)
            }
        }
    }

    pub async fn fetch(&self, label: &str) -> Result<DiseaseDetails, AdvisorError> {
        let api_key = self.config.api_key.as_deref().ok_or(AdvisorError::MissingApiKey)?;

        let mut attempt = 0;
        loop {
            match self.request(api_key, label).await {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::debug!(error = %err, attempt, "retrying knowledge lookup");
                }
                result => return result,
            }
        }
    }

    async fn request(&self, api_key: &str, label: &str) -> Result<DiseaseDetails, AdvisorError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": build_prompt(label) }],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            return Err(AdvisorError::Status { status, body: text });
        }

        parse_reply(&text)
    }
}

pub fn build_prompt(label: &str) -> String {
    format!(
        r#"Act as an agricultural expert. Provide a short description and 3 specific treatment steps for the plant disease for small farmers: "{}".

Format the output EXACTLY as this JSON:
{{
    "description": "2-3 sentences explaining the disease.",
    "treatments": "<ul><li>Step 1</li><li>Step 2</li><li>Step 3</li></ul>"
}}"#,
        prompt_name(label)
    )
}

/// Models like to wrap JSON in markdown fences.
pub fn strip_code_fences(content: &str) -> &str {
    let content = content.trim();
    let content = content
        .strip_prefix("```json")
        .or_else(|| content.strip_prefix("```"))
        .unwrap_or(content);
    let content = content.trim_end();
    content.strip_suffix("```").unwrap_or(content).trim()
}

fn parse_reply(body: &str) -> Result<DiseaseDetails, AdvisorError> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|e| AdvisorError::Malformed(e.to_string()))?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| AdvisorError::Malformed("reply has no choices".to_string()))?;

    let reply: Value = serde_json::from_str(strip_code_fences(&content))
        .map_err(|e| AdvisorError::Malformed(e.to_string()))?;

    DiseaseDetails::from_reply(&reply)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode as AxumStatus, routing::post, Json, Router};

    use super::*;

    fn client_for(api_key: Option<&str>, endpoint: String, max_retries: u8) -> Advisor {
        Advisor::new(AdvisorConfig {
            api_key: api_key.map(String::from),
            endpoint,
            model: "test/model".to_string(),
            timeout: Duration::from_secs(5),
            max_retries,
        })
        .unwrap()
    }

    /// Serves `status`/`body` for every POST and counts hits.
    fn spawn_upstream(status: u16, body: String) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/chat/completions",
                post(
                    |State((hits, status, body)): State<(Arc<AtomicUsize>, u16, String)>,
                     Json(request): Json<serde_json::Value>| async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(request["model"], "test/model");
                        assert_eq!(request["messages"][0]["role"], "user");
                        (AxumStatus::from_u16(status).unwrap(), body)
                    },
                ),
            )
            .with_state((hits.clone(), status, body));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));

        (format!("http://{}/chat/completions", addr), hits)
    }

    fn completion(content: &str) -> String {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
            .to_string()
    }

    #[test]
    fn prompt_names_the_cleaned_disease() {
        let prompt = build_prompt("Tomato___Spider_mites Two-spotted_spider_mite");
        assert!(prompt.contains("\"Tomato Spider mites Two-spotted spider mite\""));
        assert!(prompt.contains("\"treatments\": \"<ul>"));
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_list_treatments_and_missing_keys() {
        let details = parse_reply(&completion(
            r#"{"description": "Fungal.", "treatments": ["Prune", "Spray <copper>"]}"#,
        ))
        .unwrap();
        assert_eq!(details.description, "Fungal.");
        assert_eq!(
            details.treatments,
            "<ul><li>Prune</li><li>Spray &lt;copper&gt;</li></ul>"
        );

        let details = parse_reply(&completion("{}")).unwrap();
        assert_eq!(details.description, NO_DESCRIPTION);
        assert_eq!(details.treatments, NO_TREATMENTS);
    }

    #[test]
    fn coerces_non_string_fields() {
        let details = parse_reply(&completion(
            r#"{"description": 42, "treatments": ["Prune", 2, null, true]}"#,
        ))
        .unwrap();
        assert_eq!(details.description, "42");
        assert_eq!(
            details.treatments,
            "<ul><li>Prune</li><li>2</li><li>true</li></ul>"
        );

        let details = parse_reply(&completion(r#"{"description": null, "treatments": 3}"#)).unwrap();
        assert_eq!(details.description, NO_DESCRIPTION);
        assert_eq!(details.treatments, "3");

        assert!(matches!(
            parse_reply(&completion(r#"["not", "an", "object"]"#)),
            Err(AdvisorError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_replies_without_json_content() {
        assert!(matches!(
            parse_reply(&completion("Sorry, I can't help with that.")),
            Err(AdvisorError::Malformed(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"choices": []}"#),
            Err(AdvisorError::Malformed(_))
        ));
        assert!(matches!(parse_reply("<html>"), Err(AdvisorError::Malformed(_))));
    }

    #[tokio::test]
    async fn missing_key_returns_placeholder_without_network() {
        let (endpoint, hits) = spawn_upstream(200, completion("{}"));
        let advisor = client_for(None, endpoint, 1);

        for label in ["Apple___Apple_scab", "Tomato___healthy", ""] {
            let details = advisor.details(label).await;
            assert_eq!(details, DiseaseDetails::fallback(&AdvisorError::MissingApiKey));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!advisor.is_configured());
    }

    #[tokio::test]
    async fn valid_reply_passes_through_unchanged() {
        let content = "```json\n{\"description\": \"Dark lesions on leaves.\", \"treatments\": \"<ul><li>Remove leaves</li></ul>\"}\n```";
        let (endpoint, hits) = spawn_upstream(200, completion(content));
        let advisor = client_for(Some("sk-test"), endpoint, 0);

        let details = advisor.details("Apple___Apple_scab").await;
        assert_eq!(details.description, "Dark lesions on leaves.");
        assert_eq!(details.treatments, "<ul><li>Remove leaves</li></ul>");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let (endpoint, _) = spawn_upstream(200, completion("not json at all"));
        let advisor = client_for(Some("sk-test"), endpoint, 0);

        let details = advisor.details("Apple___Apple_scab").await;
        assert_eq!(
            details,
            DiseaseDetails::fallback(&AdvisorError::Malformed(String::new()))
        );
    }

    #[tokio::test]
    async fn error_status_falls_back_and_retries_server_errors_once() {
        let (endpoint, hits) = spawn_upstream(503, "overloaded".to_string());
        let advisor = client_for(Some("sk-test"), endpoint, 1);

        let details = advisor.details("Apple___Apple_scab").await;
        assert_eq!(details.description, "Could not fetch details from AI.");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let (endpoint, hits) = spawn_upstream(401, "bad key".to_string());
        let advisor = client_for(Some("sk-test"), endpoint, 1);
        advisor.details("Apple___Apple_scab").await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hanging_upstream_times_out() {
        // Accepts connections and holds them open without ever answering.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let advisor = Advisor::new(AdvisorConfig {
            api_key: Some("sk-test".to_string()),
            endpoint: format!("http://{}/chat/completions", addr),
            model: "test/model".to_string(),
            timeout: Duration::from_secs(1),
            max_retries: 0,
        })
        .unwrap();

        let started = std::time::Instant::now();
        let details = advisor.details("Apple___Apple_scab").await;

        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        assert_eq!(details.description, "Error connecting to knowledge base.");
    }

    #[tokio::test]
    async fn unreachable_upstream_falls_back() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let advisor = client_for(Some("sk-test"), format!("http://127.0.0.1:{}/", port), 0);

        let details = advisor.details("Apple___Apple_scab").await;
        assert_eq!(details.description, "Error connecting to knowledge base.");
        assert_eq!(details.treatments, "<ul><li>System Error</li></ul>");
    }
}
