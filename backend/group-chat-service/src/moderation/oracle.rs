//! External moderation oracle backed by a generative model
//!
//! The oracle is optional. Every failure (transport, status, timeout,
//! unparseable answer) is reported as `OracleOutcome::Unavailable` and the
//! evaluator falls back to heuristic scores.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::OracleConfig;
use crate::metrics::ORACLE_REQUESTS_TOTAL;

/// Scores returned by the oracle, each in [0, 1]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleScores {
    #[serde(default)]
    pub spam: f32,
    #[serde(default)]
    pub toxicity: f32,
    #[serde(default)]
    pub off_topic: f32,
    #[serde(default)]
    pub quality: f32,
    #[serde(default)]
    pub note: Option<String>,
}

impl OracleScores {
    pub fn clamped(self) -> Self {
        Self {
            spam: clamp_score(self.spam),
            toxicity: clamp_score(self.toxicity),
            off_topic: clamp_score(self.off_topic),
            quality: clamp_score(self.quality),
            note: self.note,
        }
    }
}

fn clamp_score(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome {
    Scored(OracleScores),
    /// Oracle could not be used; carries the reason for logs and notes
    Unavailable(String),
}

impl OracleOutcome {
    pub fn scores(&self) -> Option<&OracleScores> {
        match self {
            OracleOutcome::Scored(scores) => Some(scores),
            OracleOutcome::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle returned no candidate text")]
    EmptyResponse,

    #[error("malformed oracle answer: {0}")]
    Malformed(String),

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModerationOracle: Send + Sync {
    /// Score a message against the group's topic
    async fn evaluate(&self, text: &str, group_topic: &str) -> OracleOutcome;
}

/// Gemini `generateContent` adapter
pub struct GeminiOracle {
    client: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let client = HttpClient::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    async fn request(&self, text: &str, group_topic: &str) -> Result<OracleScores, OracleError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(build_prompt(text, group_topic)),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                response_mime_type: "application/json".to_string(),
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateContentResponse = response.json().await?;
        let answer = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .next()
            .ok_or(OracleError::EmptyResponse)?;

        parse_scores(&answer)
    }
}

#[async_trait]
impl ModerationOracle for GeminiOracle {
    async fn evaluate(&self, text: &str, group_topic: &str) -> OracleOutcome {
        let result = match tokio::time::timeout(self.timeout, self.request(text, group_topic)).await
        {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(self.timeout)),
        };

        match result {
            Ok(scores) => {
                ORACLE_REQUESTS_TOTAL.with_label_values(&["scored"]).inc();
                OracleOutcome::Scored(scores.clamped())
            }
            Err(e) => {
                ORACLE_REQUESTS_TOTAL
                    .with_label_values(&["unavailable"])
                    .inc();
                tracing::warn!(model = %self.model, error = %e, "moderation oracle unavailable");
                OracleOutcome::Unavailable(e.to_string())
            }
        }
    }
}

/// Prompt asking for a strict JSON verdict
pub fn build_prompt(text: &str, group_topic: &str) -> String {
    format!(
        "You are the moderator of a group chat.\n\
         Group topic: {topic}\n\
         Score the message below. Reply with strict JSON only, no prose, in the form \
         {{\"spam\": number, \"toxicity\": number, \"offTopic\": number, \"quality\": number, \"note\": string}}.\n\
         Every number is between 0 and 1. \"offTopic\" measures how unrelated the message is \
         to the group topic. \"quality\" is high for thoughtful, helpful contributions. \
         \"note\" is one short sentence explaining the verdict.\n\
         Message:\n{text}",
        topic = group_topic,
        text = text,
    )
}

/// Parse an oracle answer, tolerating markdown fences and surrounding prose
pub fn parse_scores(raw: &str) -> Result<OracleScores, OracleError> {
    let stripped = strip_fences(raw);
    if let Ok(scores) = serde_json::from_str::<OracleScores>(stripped) {
        return Ok(scores);
    }

    first_object(raw)
}

/// First `{...}` in the answer that parses as scores; trailing text is ignored
fn first_object(raw: &str) -> Result<OracleScores, OracleError> {
    let mut last_error = None;
    for (start, _) in raw.match_indices('{') {
        let mut stream =
            serde_json::Deserializer::from_str(&raw[start..]).into_iter::<OracleScores>();
        match stream.next() {
            Some(Ok(scores)) => return Ok(scores),
            Some(Err(e)) => last_error = Some(e.to_string()),
            None => break,
        }
    }
    Err(OracleError::Malformed(
        last_error.unwrap_or_else(|| "no JSON object in answer".to_string()),
    ))
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, e.g. ```json
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let scores = parse_scores(
            r#"{"spam": 0.1, "toxicity": 0.9, "offTopic": 0.2, "quality": 0.3, "note": "rude"}"#,
        )
        .unwrap();
        assert_eq!(scores.toxicity, 0.9);
        assert_eq!(scores.off_topic, 0.2);
        assert_eq!(scores.note.as_deref(), Some("rude"));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"spam\": 0.7, \"toxicity\": 0, \"offTopic\": 0, \"quality\": 0.1}\n```";
        let scores = parse_scores(raw).unwrap();
        assert_eq!(scores.spam, 0.7);
        assert!(scores.note.is_none());
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let raw = "Sure! Here is my verdict:\n{\"spam\": 0.0, \"toxicity\": 0.2, \"offTopic\": 0.95, \"quality\": 0.4, \"note\": \"about cooking\"}\nHope this helps.";
        let scores = parse_scores(raw).unwrap();
        assert_eq!(scores.off_topic, 0.95);
    }

    #[test]
    fn test_parse_takes_first_object_when_prose_has_more() {
        let raw = "Verdict: {\"spam\": 0.8, \"toxicity\": 0.1, \"offTopic\": 0, \"quality\": 0.2} \
                   and for reference the schema was {\"spam\": \"number\"}.";
        let scores = parse_scores(raw).unwrap();
        assert_eq!(scores.spam, 0.8);
        assert_eq!(scores.toxicity, 0.1);
    }

    #[test]
    fn test_parse_skips_braces_that_are_not_json() {
        let raw = "I considered {tone} first. {\"toxicity\": 0.6}";
        let scores = parse_scores(raw).unwrap();
        assert_eq!(scores.toxicity, 0.6);
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let scores = parse_scores(r#"{"toxicity": 0.5}"#).unwrap();
        assert_eq!(scores.spam, 0.0);
        assert_eq!(scores.quality, 0.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_scores("I cannot help with that."),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_scores("{not json}"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_scores_are_clamped() {
        let scores = OracleScores {
            spam: 1.7,
            toxicity: -0.2,
            off_topic: f32::NAN,
            quality: 0.5,
            note: None,
        }
        .clamped();
        assert_eq!(scores.spam, 1.0);
        assert_eq!(scores.toxicity, 0.0);
        assert_eq!(scores.off_topic, 0.0);
        assert_eq!(scores.quality, 0.5);
    }

    #[test]
    fn test_prompt_mentions_topic_and_message() {
        let prompt = build_prompt("hello there", "Rust async runtimes");
        assert!(prompt.contains("Group topic: Rust async runtimes"));
        assert!(prompt.contains("hello there"));
        assert!(prompt.contains("\"offTopic\""));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let oracle = GeminiOracle::new(&OracleConfig {
            api_key: "test".to_string(),
            model: "gemini-test".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(500),
        })
        .unwrap();

        let outcome = oracle.evaluate("some message text", "topic").await;
        assert!(matches!(outcome, OracleOutcome::Unavailable(_)));
    }
}
