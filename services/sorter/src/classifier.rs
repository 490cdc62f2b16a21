//! Vision classification client.
//!
//! One request per image to an OpenAI-compatible chat completions endpoint.
//! The reply is free text that is expected to be a comma-separated list of
//! catalog codes; anything that is not an exact catalog code is dropped.
//! Failures are returned as [`ClassificationOutcome::Failed`] values and never
//! escape as errors.

use crate::catalog::{CategoryCode, CATALOG};
use crate::config::ClassifierConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Upper bound on the error body kept in a failure reason
const MAX_ERROR_BODY_CHARS: usize = 512;

/// An uploaded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// File name, unique within a batch
    pub name: String,
    /// Encoded image content, passed through untouched
    pub bytes: Bytes,
}

impl Image {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Why a single image could not be classified
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassificationFailure {
    #[error("timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("classification service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("classification service returned an empty reply")]
    EmptyReply,

    #[error("malformed classification response: {0}")]
    MalformedResponse(String),

    #[error("cancelled")]
    Cancelled,
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    /// The service answered; `codes` may be empty
    Classified { codes: BTreeSet<CategoryCode> },
    /// No usable answer was obtained
    Failed { reason: ClassificationFailure },
}

impl ClassificationOutcome {
    pub fn classified(codes: impl IntoIterator<Item = CategoryCode>) -> Self {
        ClassificationOutcome::Classified {
            codes: codes.into_iter().collect(),
        }
    }

    pub fn failed(reason: ClassificationFailure) -> Self {
        ClassificationOutcome::Failed { reason }
    }
}

/// Anything that can tag an image with catalog codes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a single image. Must not panic on service errors.
    async fn classify(&self, image: &Image) -> ClassificationOutcome;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ChatMessage<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart> },
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
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Build the fixed system instruction listing every catalog entry
pub fn system_prompt() -> String {
    let mut prompt = String::from(
        "You are an image classification assistant. You'll be provided with an image, \
         and your task is to classify it according to these categories:\n",
    );

    for category in CATALOG.iter() {
        prompt.push_str(&format!("{:<4} - {}\n", category.code, category.description));
    }

    prompt.push_str(
        "\nRespond ONLY with the applicable category codes, separated by commas. \
         For example: \"1,3.2\" or \"2.1,3.0,3.4\"\n\
         Multiple categories can apply to a single image. Be specific and accurate.",
    );

    prompt
}

/// Extract catalog codes from a free-text reply.
///
/// Tokens are comma separated; surrounding whitespace, quotes, brackets and
/// other punctuation are stripped. Tokens that are not exact catalog codes are
/// dropped.
pub fn parse_reply(reply: &str) -> BTreeSet<CategoryCode> {
    reply
        .split(',')
        .map(clean_token)
        .filter_map(|token| CATALOG.lookup(token))
        .collect()
}

/// Catalog codes never start or end with punctuation
fn clean_token(token: &str) -> &str {
    token
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .trim()
}

/// Pull the reply text out of a chat completions response body
fn extract_reply(body: &str) -> Result<String, ClassificationFailure> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ClassificationFailure::MalformedResponse(e.to_string()))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or(ClassificationFailure::EmptyReply)?;

    if content.trim().is_empty() {
        return Err(ClassificationFailure::EmptyReply);
    }

    Ok(content)
}

/// Get the MIME type for an image file name
fn mime_type(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn transport_failure(err: reqwest::Error) -> ClassificationFailure {
    if err.is_timeout() {
        ClassificationFailure::Timeout
    } else {
        ClassificationFailure::Transport(err.to_string())
    }
}

/// Classifier backed by a remote vision model
pub struct VisionClassifier {
    client: Client,
    config: ClassifierConfig,
    system_prompt: String,
}

impl VisionClassifier {
    /// Create a new classifier client
    pub fn new(config: ClassifierConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        debug!(
            api_url = %config.api_url,
            model = %config.model,
            "Vision classifier initialized"
        );

        Ok(Self {
            client,
            config,
            system_prompt: system_prompt(),
        })
    }

    fn build_request(&self, image: &Image) -> ChatRequest<'_> {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type(&image.name),
            STANDARD.encode(&image.bytes)
        );

        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::System {
                    content: &self.system_prompt,
                },
                ChatMessage::User {
                    content: vec![
                        ContentPart::Text {
                            text: format!("Please classify this image ({}):", image.name),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_url },
                        },
                    ],
                },
            ],
            max_tokens: self.config.max_tokens,
        }
    }

    #[instrument(skip(self, image), fields(image = %image.name, size_bytes = image.bytes.len()))]
    async fn request_codes(
        &self,
        image: &Image,
    ) -> Result<BTreeSet<CategoryCode>, ClassificationFailure> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&self.build_request(image))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_failure)?;

        if !status.is_success() {
            return Err(ClassificationFailure::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let reply = extract_reply(&body)?;
        let codes = parse_reply(&reply);

        debug!(reply = %reply.trim(), matched = codes.len(), "Classifier replied");

        Ok(codes)
    }
}

#[async_trait]
impl Classifier for VisionClassifier {
    async fn classify(&self, image: &Image) -> ClassificationOutcome {
        match self.request_codes(image).await {
            Ok(codes) => ClassificationOutcome::Classified { codes },
            Err(reason) => {
                debug!(image = %image.name, reason = %reason, "Vision request failed");
                ClassificationOutcome::Failed { reason }
            }
        }
    }
}
