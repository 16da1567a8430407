use crate::common::{Frame, Verdict};
use crate::config::GeminiSettings;
use crate::error::{AnalysisError, AppError, ConfigError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROBABILITY_KEY: &str = "Probability";

/// Asks a vision model whether the subject appears in a set of frames.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn analyze(&self, frames: &[Frame], prompt: &str) -> Result<Verdict, AnalysisError>;
}

/// Gemini `generateContent` with a JSON response schema.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    subject: String,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings) -> Result<Self, AppError> {
        if settings.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("gemini.api_key is required".to_string()).into());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            subject: settings.subject.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request(
        &self,
        frames: &[Frame],
        prompt: &str,
    ) -> Result<GenerateContentRequest, AnalysisError> {
        let mut parts = Vec::with_capacity(frames.len() + 1);
        parts.push(Part::text(prompt));
        for frame in frames {
            let jpeg = frame.to_jpeg().map_err(|e| {
                AnalysisError::Request(format!("Failed to encode frame {}: {}", frame.index(), e))
            })?;
            parts.push(Part::jpeg(&jpeg));
        }

        Ok(GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json".to_string(),
                response_schema: verdict_schema(&self.subject),
            },
        })
    }
}

fn verdict_schema(subject: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            subject: {"type": "boolean"},
            PROBABILITY_KEY: {"type": "number"},
        },
        "required": [subject, PROBABILITY_KEY],
    })
}

/// Reads the verdict out of a `generateContent` response body. Missing
/// answer fields count as "not detected" with probability 0.
fn parse_verdict(body: &str, subject: &str) -> Result<Verdict, AnalysisError> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| AnalysisError::Malformed(format!("Failed to parse response: {}", e)))?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(AnalysisError::Malformed(format!(
            "Content blocked by safety filters: {}",
            reason
        )));
    }

    let text: String = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .ok_or_else(|| AnalysisError::Malformed("No candidates returned".to_string()))?;

    let answer: serde_json::Value = serde_json::from_str(text.trim())
        .map_err(|e| AnalysisError::Malformed(format!("Answer is not JSON: {}", e)))?;
    let answer = answer
        .as_object()
        .ok_or_else(|| AnalysisError::Malformed("Answer is not a JSON object".to_string()))?;

    let detected = answer
        .get(subject)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let probability = answer
        .get(PROBABILITY_KEY)
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);
    Verdict::new(detected, probability)
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn analyze(&self, frames: &[Frame], prompt: &str) -> Result<Verdict, AnalysisError> {
        if frames.is_empty() {
            return Err(AnalysisError::NoFrames);
        }
        let request = self.build_request(frames, prompt)?;

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Request(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::Request(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let verdict = parse_verdict(&body, &self.subject)?;
        debug!(
            frames = frames.len(),
            detected = verdict.detected,
            probability = verdict.probability,
            "Gemini answered"
        );
        Ok(verdict)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    inline_data: Option<Blob>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn jpeg(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(Blob {
                mime_type: "image/jpeg".to_string(),
                data: STANDARD.encode(bytes),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn settings() -> GeminiSettings {
        GeminiSettings {
            api_key: "test-key".to_string(),
            ..GeminiSettings::default()
        }
    }

    fn frame(index: usize) -> Frame {
        Frame::new(
            index,
            Duration::from_millis(500),
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([90, 120, 30]))),
        )
    }

    fn response_with(answer: &str) -> String {
        serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": answer}]}, "finishReason": "STOP"}]
        })
        .to_string()
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            GeminiClient::new(&GeminiSettings::default()),
            Err(AppError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn request_puts_prompt_before_inline_jpegs() {
        let client = GeminiClient::new(&settings()).unwrap();
        let request = client.build_request(&[frame(0), frame(1)], "Is er een reiger?").unwrap();
        let json = serde_json::to_value(&request).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "Is er een reiger?");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        let jpeg = STANDARD
            .decode(parts[1]["inlineData"]["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let config = &json["generationConfig"];
        assert_eq!(config["temperature"], 0.0);
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"]["properties"]["Reiger"]["type"], "boolean");
        assert_eq!(config["responseSchema"]["required"][1], "Probability");
    }

    #[test]
    fn endpoint_uses_configured_model() {
        let client = GeminiClient::new(&settings()).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash-latest:generateContent"
        );
    }

    #[test]
    fn parses_structured_answer() {
        let body = response_with(r#"{"Reiger": true, "Probability": 0.85}"#);
        let verdict = parse_verdict(&body, "Reiger").unwrap();
        assert!(verdict.detected);
        assert_eq!(verdict.probability, 0.85);
    }

    #[test]
    fn missing_fields_mean_not_detected() {
        let verdict = parse_verdict(&response_with("{}"), "Reiger").unwrap();
        assert!(!verdict.detected);
        assert_eq!(verdict.probability, 0.0);
    }

    #[test]
    fn out_of_range_probability_is_clamped() {
        let body = response_with(r#"{"Reiger": true, "Probability": 85}"#);
        assert_eq!(parse_verdict(&body, "Reiger").unwrap().probability, 1.0);
    }

    #[test]
    fn unusable_responses_are_malformed() {
        assert!(matches!(
            parse_verdict(&response_with("ja, een reiger"), "Reiger"),
            Err(AnalysisError::Malformed(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"candidates": []}"#, "Reiger"),
            Err(AnalysisError::Malformed(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#, "Reiger"),
            Err(AnalysisError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn no_frames_is_an_error() {
        let client = GeminiClient::new(&settings()).unwrap();
        assert_eq!(
            client.analyze(&[], "prompt").await,
            Err(AnalysisError::NoFrames)
        );
    }
}
