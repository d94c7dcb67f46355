/// AI Gateway for the tutor
///
/// This module defines the boundary to the remote generative service: the
/// [`TutorGateway`] trait consumed by the session manager and the speech
/// player, the failure taxonomy, and the fixed prompts.
///
/// # Architecture
///
/// - `gemini` - REST backend for the Gemini `generateContent` endpoint
///
/// # Usage
///
/// ```rust,no_run
/// use socratic_tutor::config::TutorConfig;
/// use socratic_tutor::gateway::{GeminiGateway, TutorGateway};
/// use socratic_tutor::ReasoningMode;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = TutorConfig::from_env()?;
/// let gateway = GeminiGateway::new(config.gateway);
/// let reply = gateway
///     .generate_tutor_reply("How do I start?", &[], ReasoningMode::Fast)
///     .await?;
/// # Ok(())
/// # }
/// ```
mod gemini;

pub use gemini::GeminiGateway;

use crate::types::{ChatTurn, ReasoningMode};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The call completed but the service declined to produce content.
    #[error("response blocked: {reason}")]
    Blocked { reason: String },

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("API key rejected")]
    AuthInvalid,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("no audio data received")]
    NoAudio,
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Stateless request/response boundary to the generative service.
#[async_trait]
pub trait TutorGateway: Send + Sync {
    /// Produces the next tutor utterance for `prompt` given the prior turns.
    async fn generate_tutor_reply(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        mode: ReasoningMode,
    ) -> GatewayResult<String>;

    /// Returns mono 16-bit little-endian PCM at [`crate::audio::SPEECH_SAMPLE_RATE`].
    async fn synthesize_speech(&self, text: &str) -> GatewayResult<Vec<u8>>;
}

/// Maps an unsuccessful HTTP status and body onto the failure taxonomy.
pub fn classify_status(status: u16, body: &str) -> GatewayError {
    let lowered = body.to_ascii_lowercase();
    match status {
        429 => GatewayError::QuotaExceeded,
        401 | 403 => GatewayError::AuthInvalid,
        400 if lowered.contains("api key not valid") || lowered.contains("api_key_invalid") => {
            GatewayError::AuthInvalid
        }
        400..=499 => GatewayError::MalformedRequest(format!("{status}: {}", summarize(body))),
        _ => GatewayError::Unavailable(format!("{status}: {}", summarize(body))),
    }
}

fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        let head: String = trimmed.chars().take(200).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

/// Behavioral instruction attached to every generation call.
pub const SOCRATIC_SYSTEM_INSTRUCTION: &str = r#"You are a compassionate and patient Socratic math tutor.

Your goal is to guide the student to the solution, never to hand it over.
- Reveal only the next single step, then stop and ask the student to try it.
- Wait for the student's attempt before moving on; check their work kindly.
- When the student asks about a concept, explain the idea behind it clearly.
- Never solve the whole problem unless the student explicitly asks for it.
- Format with markdown and write all mathematics in LaTeX ($...$ inline, $$...$$ display)."#;

/// Prompt used to open a session from a photo or a practice problem.
pub const FIRST_STEP_PROMPT: &str = "This is a math problem. Please explain the very first step to begin solving it. Be encouraging and ask me to try it myself.";

/// Seed text of a session started from a practice problem.
pub fn practice_seed_text(problem_text: &str) -> String {
    format!("Here is the math problem I want to solve: {problem_text}")
}

/// Quick prompts offered under the chat input.
pub const PROMPT_SUGGESTIONS: [&str; 3] = [
    "What's the concept behind this?",
    "Show me the next step",
    "Explain that in a different way",
];
