//! Adapter for a remote multimodal model reached over an
//! OpenAI-compatible chat-completions endpoint.
//!
//! The adapter never fails: a missing API key, transport errors, timeouts
//! and unusable answers all come back as failure-shaped
//! [`PredictionResult`]s whose reasoning says what went wrong.

use std::env;
use std::fmt;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use super::{FailureKind, ImageClassifier, ModelIdentifier, PredictionResult};
use crate::payload::QueryImage;
use crate::registry::ClassDefinition;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_EXEMPLARS: usize = 3;

const SYSTEM_PROMPT: &str = "You are an image classifier. You are shown labeled example images \
for each class, followed by a query image. Decide which class the query image belongs to. \
Respond with a single JSON object and nothing else.";

/// Connection settings for the remote classifier.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    /// Bearer token. `None` disables the remote classifier.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Upper bound on example images sent per class.
    pub max_exemplars_per_class: usize,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_exemplars_per_class", &self.max_exemplars_per_class)
            .finish()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            max_exemplars_per_class: DEFAULT_MAX_EXEMPLARS,
        }
    }
}

impl RemoteConfig {
    /// Reads `OCCIPITAL_REMOTE_API_KEY`, `OCCIPITAL_REMOTE_ENDPOINT` and
    /// `OCCIPITAL_REMOTE_MODEL`, falling back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = env::var("OCCIPITAL_REMOTE_API_KEY") {
            if !key.trim().is_empty() {
                config.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(endpoint) = env::var("OCCIPITAL_REMOTE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(model) = env::var("OCCIPITAL_REMOTE_MODEL") {
            config.model = model;
        }
        config
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// The JSON object the remote model is asked to produce.
#[derive(Debug, Deserialize)]
struct RemoteVerdict {
    #[serde(rename = "className", alias = "class_name", alias = "class")]
    class_name: String,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// A verdict that names a current class and carries a usable confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVerdict {
    pub class_name: String,
    pub confidence: f32,
    pub reasoning: Option<String>,
}

/// Classifier backed by a remote multimodal chat model.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    client: Client,
    config: RemoteConfig,
}

impl RemoteClassifier {
    pub fn new(config: RemoteConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn failed(reason: impl Into<String>, failure: FailureKind) -> PredictionResult {
        PredictionResult::failed(ModelIdentifier::Remote, failure, reason)
    }

    fn build_request(
        &self,
        query: &QueryImage,
        classes: &[ClassDefinition],
    ) -> Result<ChatRequest, ClassifierError> {
        let names: Vec<&str> = classes.iter().map(|c| c.name()).collect();
        let mut content = Vec::new();
        for class in classes {
            content.push(ContentPart::Text {
                text: format!("Examples of class \"{}\":", class.name()),
            });
            for sample in class.samples().iter().take(self.config.max_exemplars_per_class) {
                content.push(ContentPart::ImageUrl {
                    image_url: ImageUrl { url: sample.to_data_url()? },
                });
            }
        }
        content.push(ContentPart::Text { text: "Query image:".to_string() });
        content.push(ContentPart::ImageUrl {
            image_url: ImageUrl { url: query.payload().to_data_url()? },
        });
        content.push(ContentPart::Text {
            text: format!(
                "Answer with JSON of the form {{\"className\": string, \"confidence\": number, \"reasoning\": string}}. \
                 className must be exactly one of {}. confidence is your probability between 0 and 1 \
                 that the answer is correct. reasoning is one or two sentences.",
                serde_json::to_string(&names).unwrap_or_default()
            ),
        });

        Ok(ChatRequest {
            model: self.config.model.clone(),
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: vec![ContentPart::Text { text: SYSTEM_PROMPT.to_string() }],
                },
                ChatMessage { role: "user", content },
            ],
        })
    }

    async fn send(&self, api_key: &str, request: &ChatRequest) -> Result<String, reqwest::Error> {
        self.client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Runs one remote classification, folding every failure into the result.
    pub async fn classify_or_fail(&self, query: &QueryImage, classes: &[ClassDefinition]) -> PredictionResult {
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            return Self::failed(
                "Remote classifier unavailable: no API key configured (set OCCIPITAL_REMOTE_API_KEY)",
                FailureKind::RemoteUnavailable,
            );
        };
        if classes.is_empty() {
            return Self::failed("No classes defined", FailureKind::InsufficientData);
        }

        let request = match self.build_request(query, classes) {
            Ok(request) => request,
            Err(e) => return PredictionResult::from_error(ModelIdentifier::Remote, &e),
        };

        debug!("Sending remote classification request to {}", self.config.endpoint);
        let body = match tokio::time::timeout(self.config.timeout, self.send(api_key, &request)).await {
            Err(_) => {
                warn!("Remote classifier timed out after {:?}", self.config.timeout);
                return Self::failed(
                    format!("Remote service did not answer within {:?}", self.config.timeout),
                    FailureKind::RemoteTimeout,
                );
            }
            Ok(Err(e)) if e.is_timeout() => {
                warn!("Remote classifier timed out: {}", e);
                return Self::failed(
                    format!("Remote service did not answer within {:?}", self.config.timeout),
                    FailureKind::RemoteTimeout,
                );
            }
            Ok(Err(e)) => {
                warn!("Remote classifier request failed: {}", e);
                return Self::failed(format!("Remote request failed: {}", e), FailureKind::RemoteUnavailable);
            }
            Ok(Ok(body)) => body,
        };

        match parse_response(&body, classes) {
            Ok(verdict) => {
                let result = PredictionResult::scored(ModelIdentifier::Remote, verdict.class_name, verdict.confidence);
                match verdict.reasoning {
                    Some(reasoning) => result.with_reasoning(reasoning),
                    None => result,
                }
            }
            Err(reason) => {
                warn!("Unusable remote response: {}", reason);
                Self::failed(format!("Could not parse remote response: {}", reason), FailureKind::RemoteParseError)
            }
        }
    }
}

#[async_trait]
impl ImageClassifier for RemoteClassifier {
    fn model(&self) -> ModelIdentifier {
        ModelIdentifier::Remote
    }

    async fn classify(
        &self,
        query: &QueryImage,
        classes: &[ClassDefinition],
    ) -> Result<PredictionResult, ClassifierError> {
        Ok(self.classify_or_fail(query, classes).await)
    }
}

/// Strips Markdown code fences and any prose around the JSON object.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parses a chat-completions response body into a verdict about one of `classes`.
pub fn parse_response(body: &str, classes: &[ClassDefinition]) -> Result<ParsedVerdict, String> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed response body: {}", e))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| "response contains no message content".to_string())?;
    parse_verdict(&content, classes)
}

/// Exact name first; a case-insensitive hit only counts when it is unique.
fn match_class<'a>(wanted: &str, classes: &'a [ClassDefinition]) -> Result<&'a ClassDefinition, String> {
    if let Some(class) = classes.iter().find(|c| c.name() == wanted) {
        return Ok(class);
    }
    let mut folded = classes.iter().filter(|c| c.name().eq_ignore_ascii_case(wanted));
    match (folded.next(), folded.next()) {
        (Some(class), None) => Ok(class),
        (Some(_), Some(_)) => Err(format!("ambiguous class '{}'", wanted)),
        (None, _) => Err(format!("unknown class '{}'", wanted)),
    }
}

/// Parses the model's JSON answer and matches it against the current classes.
pub fn parse_verdict(content: &str, classes: &[ClassDefinition]) -> Result<ParsedVerdict, String> {
    let json = extract_json_object(content).ok_or_else(|| "answer contains no JSON object".to_string())?;
    let verdict: RemoteVerdict =
        serde_json::from_str(json).map_err(|e| format!("malformed answer: {}", e))?;

    let wanted = verdict.class_name.trim();
    let class = match_class(wanted, classes)?;

    if !verdict.confidence.is_finite() || !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(format!("confidence {} is outside [0, 1]", verdict.confidence));
    }

    Ok(ParsedVerdict {
        class_name: class.name().to_string(),
        confidence: verdict.confidence as f32,
        reasoning: verdict.reasoning.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::encode_png;
    use crate::registry::ClassRegistry;
    use image::{Rgb, RgbImage};
    use std::time::Instant;

    fn registry(samples_per_class: usize) -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        for name in ["Cat", "Dog"] {
            let id = registry.add_class(name).unwrap();
            for i in 0..samples_per_class {
                let payload = encode_png(&RgbImage::from_pixel(2, 2, Rgb([i as u8, 0, 0]))).unwrap();
                registry.add_sample(id, payload).unwrap();
            }
        }
        registry
    }

    fn query() -> QueryImage {
        QueryImage::decode(encode_png(&RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]))).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_failure_result() {
        let classifier = RemoteClassifier::new(RemoteConfig::default()).unwrap();
        let started = Instant::now();
        let result = classifier
            .classify(&query(), registry(1).list_classes())
            .await
            .unwrap();
        assert_eq!(result.failure(), Some(FailureKind::RemoteUnavailable));
        assert_eq!(result.confidence(), None);
        assert!(result.reasoning.unwrap().contains("API key"));
        assert!(started.elapsed() < DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_request_bounds_exemplars() {
        let config = RemoteConfig {
            max_exemplars_per_class: 2,
            ..RemoteConfig::default()
        };
        let classifier = RemoteClassifier::new(config).unwrap();
        let request = classifier.build_request(&query(), registry(5).list_classes()).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        let parts = json["messages"][1]["content"].as_array().unwrap();
        let images = parts.iter().filter(|p| p["type"] == "image_url").count();
        assert_eq!(images, 2 * 2 + 1);
        let last = parts.last().unwrap()["text"].as_str().unwrap();
        assert!(last.contains("[\"Cat\",\"Dog\"]"));
        assert!(parts[1]["image_url"]["url"].as_str().unwrap().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_parse_valid_verdict() {
        let registry = registry(1);
        let verdict = parse_verdict(
            "```json\n{\"className\": \" dog \", \"confidence\": 0.8, \"reasoning\": \"Floppy ears.\"}\n```",
            registry.list_classes(),
        )
        .unwrap();
        assert_eq!(verdict.class_name, "Dog");
        assert!((verdict.confidence - 0.8).abs() < 1e-6);
        assert_eq!(verdict.reasoning.as_deref(), Some("Floppy ears."));
    }

    #[test]
    fn test_parse_rejects_unknown_class() {
        let registry = registry(1);
        let err = parse_verdict("{\"className\": \"Horse\", \"confidence\": 0.9}", registry.list_classes())
            .unwrap_err();
        assert!(err.contains("unknown class"));
    }

    #[test]
    fn test_parse_prefers_exact_class_name() {
        let mut registry = ClassRegistry::new();
        registry.add_class("cat").unwrap();
        registry.add_class("Cat").unwrap();
        registry.add_class("Dog").unwrap();
        let classes = registry.list_classes();
        let answer = |name: &str| format!("{{\"className\": \"{}\", \"confidence\": 0.7}}", name);

        assert_eq!(parse_verdict(&answer("Cat"), classes).unwrap().class_name, "Cat");
        assert_eq!(parse_verdict(&answer("cat"), classes).unwrap().class_name, "cat");
        assert_eq!(parse_verdict(&answer("DOG"), classes).unwrap().class_name, "Dog");
        let err = parse_verdict(&answer("CAT"), classes).unwrap_err();
        assert!(err.contains("ambiguous"));
    }

    #[test]
    fn test_parse_rejects_bad_answers() {
        let registry = registry(1);
        let classes = registry.list_classes();
        assert!(parse_verdict("I think it is a cat", classes).is_err());
        assert!(parse_verdict("{\"className\": \"Cat\"}", classes).is_err());
        assert!(parse_verdict("{\"className\": \"Cat\", \"confidence\": 7}", classes).is_err());
        assert!(parse_response("<html>bad gateway</html>", classes).is_err());
        assert!(parse_response("{\"choices\": []}", classes).is_err());
    }

    #[test]
    fn test_parse_full_response() {
        let registry = registry(1);
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "{\"className\": \"Cat\", \"confidence\": 0.65, \"reasoning\": \"Whiskers\"}"
                }
            }]
        })
        .to_string();
        let verdict = parse_response(&body, registry.list_classes()).unwrap();
        assert_eq!(verdict.class_name, "Cat");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = RemoteConfig::default().with_api_key("sk-secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
