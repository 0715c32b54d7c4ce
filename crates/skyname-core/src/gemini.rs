//! Gemini Classification Client
//!
//! Sends a batch of inlined images to the `generateContent` endpoint and asks
//! for one `{aircraftName, description}` object per image.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::batch::UNEXPECTED_FORMAT;
use crate::gateway::{
    ClassificationResult, Classifier, GatewayError, ImagePayload, API_KEY_MISSING, API_REQUEST_FAILED,
};

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

fn prompt(count: usize) -> String {
    format!(
        r#"For each of the following images:
1. Identify the primary aircraft model. If it's unidentifiable, use "unknown".
2. Write a brief, one-sentence description of the image, focusing on the aircraft and its activity.

Return a JSON array of objects, one for each image. Each object must have "aircraftName" and "description" properties.
Do not include file extensions in the aircraftName.
Example: [{{"aircraftName": "Boeing 747", "description": "A jumbo jet taking off against a sunset."}}, {{"aircraftName": "unknown", "description": "A blurry photo of an airport tarmac."}}]
There are {count} images. Provide {count} results."#
    )
}

/// Request body: every image inlined as base64, then the instructions.
pub(crate) fn build_request(images: &[ImagePayload]) -> Value {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut parts: Vec<Value> = images
        .iter()
        .map(|img| {
            json!({
                "inline_data": {
                    "mime_type": img.mime_type,
                    "data": engine.encode(&img.data),
                }
            })
        })
        .collect();
    parts.push(json!({ "text": prompt(images.len()) }));

    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "aircraftName": {
                            "type": "STRING",
                            "description": "The identified aircraft name, or \"unknown\". Without extension."
                        },
                        "description": {
                            "type": "STRING",
                            "description": "A brief, one-sentence description of the image."
                        }
                    },
                    "required": ["aircraftName", "description"]
                }
            }
        }
    })
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
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn string_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Turn a `generateContent` response body into one result per array item.
///
/// Nothing here is a fault: a body or text that does not decode fails the
/// whole batch with "API request failed.", and JSON that is not an array
/// fails it with "AI returned unexpected format.". Items are read leniently,
/// a missing `aircraftName` ends up as "unknown" once sanitized. The array
/// length is not checked here.
pub(crate) fn parse_response(body: &str, count: usize) -> Vec<ClassificationResult> {
    let response: GenerateResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Undecodable Gemini response");
            return ClassificationResult::failed_batch(count, API_REQUEST_FAILED);
        }
    };

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let parsed: Value = match serde_json::from_str(text.trim()) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Gemini text is not JSON");
            return ClassificationResult::failed_batch(count, API_REQUEST_FAILED);
        }
    };
    let Value::Array(items) = parsed else {
        warn!("Gemini returned JSON that is not an array");
        return ClassificationResult::failed_batch(count, UNEXPECTED_FORMAT);
    };

    items
        .iter()
        .map(|item| {
            ClassificationResult::identified(string_field(item, "aircraftName"), string_field(item, "description"))
        })
        .collect()
}

#[async_trait]
impl Classifier for GeminiClient {
    async fn classify(&self, images: &[ImagePayload]) -> Result<Vec<ClassificationResult>, GatewayError> {
        let Some(api_key) = self.api_key() else {
            return Ok(ClassificationResult::failed_batch(images.len(), API_KEY_MISSING));
        };

        debug!(images = images.len(), model = %self.config.model, "Sending batch to Gemini");
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&build_request(images))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body, "Gemini API error");
            return Ok(ClassificationResult::failed_batch(images.len(), API_REQUEST_FAILED));
        }

        Ok(parse_response(&body, images.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::images;
    use crate::naming;
    use crate::record::FileStatus;
    use crate::session::{CycleSummary, Session};
    use crate::RenameOptions;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn payload(name: &str) -> ImagePayload {
        ImagePayload {
            file_name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
            data: b"abc".to_vec(),
        }
    }

    #[test]
    fn test_build_request() {
        let body = build_request(&[payload("a.jpg"), payload("b.jpg")]);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inline_data"]["data"], "YWJj");
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/jpeg");
        assert!(parts[2]["text"].as_str().unwrap().contains("There are 2 images. Provide 2 results."));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    fn reply(text: &str) -> String {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] }).to_string()
    }

    #[test]
    fn test_parse_response() {
        let body = reply(
            r#"[{"aircraftName": "Boeing 747", "description": "A jumbo jet."}, {"aircraftName": "unknown", "description": "Tarmac."}]"#,
        );
        let results = parse_response(&body, 2);
        assert_eq!(
            results,
            vec![
                ClassificationResult::identified("Boeing 747", "A jumbo jet."),
                ClassificationResult::identified("unknown", "Tarmac."),
            ]
        );
    }

    #[test]
    fn test_parse_response_missing_name_is_unknown() {
        let body = reply(
            r#"[{"aircraftName": "Boeing 747", "description": "A jumbo jet."}, {"description": "Tarmac."}, {"aircraftName": null}]"#,
        );
        let results = parse_response(&body, 3);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[1], ClassificationResult::identified("", "Tarmac."));
        assert_eq!(naming::result_label(&results[1]), "unknown");
        assert_eq!(naming::result_label(&results[2]), "unknown");
    }

    #[test]
    fn test_parse_response_bad_reply_fails_batch() {
        let failed_with = |results: Vec<ClassificationResult>, message: &str| {
            results.len() == 2 && results.iter().all(|r| !r.success && r.error.as_deref() == Some(message))
        };
        assert!(failed_with(parse_response("not json", 2), API_REQUEST_FAILED));
        assert!(failed_with(parse_response(r#"{"candidates": []}"#, 2), API_REQUEST_FAILED));
        assert!(failed_with(parse_response(&reply("Sorry, I cannot help."), 2), API_REQUEST_FAILED));
        assert!(failed_with(parse_response(&reply(r#"{"aircraftName": "A320"}"#), 2), UNEXPECTED_FORMAT));
    }

    /// Replays canned response bodies through the same parsing as the client.
    struct CannedReplies {
        bodies: Mutex<VecDeque<String>>,
    }

    #[async_trait]
    impl Classifier for CannedReplies {
        async fn classify(&self, images: &[ImagePayload]) -> Result<Vec<ClassificationResult>, GatewayError> {
            let body = self.bodies.lock().unwrap().pop_front().unwrap_or_default();
            Ok(parse_response(&body, images.len()))
        }
    }

    #[tokio::test]
    async fn test_bad_reply_only_fails_its_batch() {
        let canned = CannedReplies {
            bodies: Mutex::new(VecDeque::from([
                reply(r#"[{"aircraftName": "Boeing 747", "description": "Climbing out."}, {"aircraftName": "Cessna 172", "description": "On final."}]"#),
                reply("[{\"aircraftName\": \"Airbus"),
                reply(r#"[{"aircraftName": "Airbus A320", "description": "Taxiing."}, {"description": "Empty apron."}]"#),
            ])),
        };
        let mut session = Session::new();
        session.load(images(6));
        let options = RenameOptions {
            batch_size: 2,
            ..Default::default()
        };

        let summary = session.rename(&canned, &options, &|_: &str, _: u64, _: u64, _: &str| {}).await;

        let r = session.records();
        assert_eq!(summary, CycleSummary { images: 6, renamed: 4, failed: 2 });
        assert_eq!(r[0].new_name, "boeing-747.jpg");
        assert_eq!(r[1].new_name, "cessna-172.jpg");
        for record in &r[2..4] {
            assert_eq!(record.status, FileStatus::Error);
            assert_eq!(record.error_message.as_deref(), Some(API_REQUEST_FAILED));
            assert_eq!(record.new_name, record.original_name);
        }
        assert_eq!(r[4].new_name, "airbus-a320.jpg");
        assert_eq!(r[5].new_name, "img5.jpg");
        assert_eq!(r[5].status, FileStatus::Done);
    }

    #[tokio::test]
    async fn test_missing_key_fails_every_image() {
        let client = GeminiClient::new(GeminiConfig {
            api_key: Some("  ".into()),
            ..Default::default()
        })
        .unwrap();
        let results = client.classify(&[payload("a.jpg"), payload("b.jpg")]).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| !r.success && r.error.as_deref() == Some(API_KEY_MISSING)));
    }

    #[test]
    fn test_url() {
        let client = GeminiClient::new(GeminiConfig {
            endpoint: "http://localhost:9000/v1beta/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url(), "http://localhost:9000/v1beta/models/gemini-2.5-flash:generateContent");
    }
}
