use super::{
    GatewayError, GatewayResult, SOCRATIC_SYSTEM_INSTRUCTION, TutorGateway, classify_status,
};
use crate::config::GatewayConfig;
use crate::types::{ChatTurn, ReasoningMode, Speaker};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiGateway {
    client: Client,
    config: GatewayConfig,
}

impl GeminiGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn model_for(&self, mode: ReasoningMode) -> &str {
        match mode {
            ReasoningMode::Fast => &self.config.fast_model,
            ReasoningMode::Extended => &self.config.extended_model,
        }
    }

    async fn generate(&self, model: &str, request: &GenerateRequest<'_>) -> GatewayResult<GenerateResponse> {
        let url = format!("{}/models/{}:generateContent", self.config.api_base, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let err = classify_status(status.as_u16(), &body);
            tracing::warn!(model, %status, error = %err, "gemini request failed");
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|err| GatewayError::Unavailable(format!("unreadable response: {err}")))
    }
}

// ============================================
// Wire Types
// ============================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    inline_data: Option<ResponseInlineData>,
}

#[derive(Deserialize, Debug)]
struct ResponseInlineData {
    data: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Unavailable(err.to_string())
    }
}

// ============================================
// Request Building / Response Parsing
// ============================================

/// Converts prior turns plus the new prompt into Gemini `contents`.
fn build_contents<'a>(history: &'a [ChatTurn], prompt: &'a str) -> Vec<Content<'a>> {
    let mut contents: Vec<Content<'a>> = history
        .iter()
        .map(|turn| {
            let mut parts = Vec::new();
            if let Some(image) = turn.image() {
                parts.push(Part::Inline {
                    inline_data: InlineData {
                        mime_type: image.mime_type(),
                        data: image.base64_payload(),
                    },
                });
            }
            if !turn.text().is_empty() {
                parts.push(Part::Text { text: turn.text() });
            }
            if parts.is_empty() {
                parts.push(Part::Text { text: "" });
            }
            let role = match turn.speaker() {
                Speaker::User => "user",
                Speaker::Tutor => "model",
            };
            Content {
                role: Some(role),
                parts,
            }
        })
        .collect();

    contents.push(Content {
        role: Some("user"),
        parts: vec![Part::Text { text: prompt }],
    });
    contents
}

fn block_reason(response: &GenerateResponse) -> Option<String> {
    let Some(first) = response.candidates.first() else {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone())
            .unwrap_or_else(|| "Safety concerns".to_string());
        return Some(reason);
    };
    first
        .finish_reason
        .as_deref()
        .filter(|reason| BLOCKING_FINISH_REASONS.contains(reason))
        .map(str::to_string)
}

fn extract_reply(response: GenerateResponse) -> GatewayResult<String> {
    if let Some(reason) = block_reason(&response) {
        tracing::warn!(%reason, "gemini response blocked");
        return Err(GatewayError::Blocked { reason });
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| !part.thought)
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GatewayError::Unavailable("empty response".to_string()));
    }
    Ok(text)
}

fn extract_audio(response: GenerateResponse) -> GatewayResult<Vec<u8>> {
    if let Some(reason) = block_reason(&response) {
        return Err(GatewayError::Blocked { reason });
    }

    let data = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| {
            content
                .parts
                .into_iter()
                .find_map(|part| part.inline_data.map(|inline| inline.data))
        })
        .ok_or(GatewayError::NoAudio)?;

    STANDARD
        .decode(data.trim())
        .map_err(|err| GatewayError::Unavailable(format!("undecodable audio payload: {err}")))
}

#[async_trait]
impl TutorGateway for GeminiGateway {
    async fn generate_tutor_reply(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        mode: ReasoningMode,
    ) -> GatewayResult<String> {
        let generation_config = mode.is_extended().then(|| GenerationConfig {
            thinking_config: Some(ThinkingConfig {
                thinking_budget: self.config.thinking_budget,
            }),
            ..GenerationConfig::default()
        });
        let request = GenerateRequest {
            contents: build_contents(history, prompt),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::Text {
                    text: SOCRATIC_SYSTEM_INSTRUCTION,
                }],
            }),
            generation_config,
        };

        let model = self.model_for(mode);
        tracing::debug!(model, turns = history.len(), "requesting tutor reply");
        let response = self.generate(model, &request).await?;
        extract_reply(response)
    }

    async fn synthesize_speech(&self, text: &str) -> GatewayResult<Vec<u8>> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: None,
                parts: vec![Part::Text { text }],
            }],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO"]),
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &self.config.tts_voice,
                        },
                    },
                }),
                ..GenerationConfig::default()
            }),
        };

        let response = self.generate(&self.config.tts_model, &request).await?;
        extract_audio(response)
    }
}
