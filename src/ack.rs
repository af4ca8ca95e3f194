use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AckError;
use crate::models::{NpsCategory, Submission};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const EMPTY_REPLY: &str = "Thank you for your feedback!";

/// Writes the thank-you message a patient sees after submitting.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn generate(&self, submission: &Submission) -> Result<String, AckError>;
}

/// Closing line every acknowledgment must end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    clinic: String,
}

impl Signature {
    pub fn new(clinic: impl Into<String>) -> Self {
        Self {
            clinic: clinic.into(),
        }
    }

    pub fn clinic(&self) -> &str {
        &self.clinic
    }

    pub fn line(&self) -> String {
        format!("Sincerely, {}", self.clinic)
    }

    /// Appends the signature when the text never names the clinic.
    pub fn ensure(&self, text: &str) -> String {
        let text = text.trim();
        let text = if text.is_empty() { EMPTY_REPLY } else { text };
        if text.contains(&self.clinic) {
            text.to_string()
        } else {
            format!("{text}\n\n{}", self.line())
        }
    }

    pub fn fallback(&self, submission: &Submission) -> String {
        format!(
            "Thank you for rating your visit with {}! We truly value your feedback.\n\n{}",
            submission.professional,
            self.line()
        )
    }
}

pub fn build_prompt(submission: &Submission, signature: &Signature) -> String {
    let comment = if submission.comment.trim().is_empty() {
        "No comment provided"
    } else {
        submission.comment.as_str()
    };
    let tone = match submission.score.category() {
        NpsCategory::Detractor => {
            "The rating is low: show empathy and say we are working to improve the service."
        }
        NpsCategory::Passive | NpsCategory::Promoter => {
            "The rating is high: show genuine gratitude and mention the professional warmly."
        }
    };

    format!(
        "Read the following feedback about a medical appointment and write an official thank-you reply.\n\
         \n\
         Feedback:\n\
         - Professional: {professional}\n\
         - Rating: {score}/10\n\
         - Comment: \"{comment}\"\n\
         \n\
         Instructions:\n\
         1. Be brief, warm and professional.\n\
         2. {tone}\n\
         3. The reply MUST end exactly with the signature: \"{signature}\".\n\
         4. Plain text only, no markdown.\n",
        professional = submission.professional,
        score = submission.score,
        signature = signature.line(),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<PartOut<'a>>,
}

#[derive(Debug, Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Debug, Deserialize)]
struct PartIn {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Acknowledgments from the Gemini `generateContent` endpoint.
pub struct GeminiAcknowledger {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    signature: Signature,
}

impl GeminiAcknowledger {
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        signature: Signature,
        timeout: Duration,
    ) -> Result<Self, AckError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
            api_key,
            signature,
        })
    }
}

#[async_trait]
impl Acknowledger for GeminiAcknowledger {
    async fn generate(&self, submission: &Submission) -> Result<String, AckError> {
        let api_key = self.api_key.as_deref().ok_or(AckError::MissingApiKey)?;
        let prompt = build_prompt(submission, &self.signature);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![PartOut { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.8,
                top_k: 40,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AckError::Status(response.status()));
        }

        let bytes = response.bytes().await?;
        let parsed: GenerateResponse = serde_json::from_slice(&bytes)?;
        Ok(self.signature.ensure(&parsed.text()))
    }
}
