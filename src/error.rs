//! User-facing error taxonomy of the tutor.
//!
//! Module errors ([`GatewayError`], [`RegistryError`], [`AudioError`]) convert
//! into [`TutorError`], whose `Display` is the message shown to the student.

use crate::audio::AudioError;
use crate::gateway::GatewayError;
use crate::registry::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TutorError {
    /// Saving a session that has no turns.
    #[error("Cannot save an empty chat.")]
    EmptySubmission,

    #[error("The response was blocked. Reason: {reason}.")]
    GatewayBlocked { reason: String },

    #[error("Quota exceeded. Please wait a moment before trying again.")]
    GatewayQuotaExceeded,

    #[error("Invalid API Key.")]
    GatewayAuthInvalid,

    #[error("Failed to get response from AI.")]
    GatewayUnavailable,

    #[error("The AI service rejected the request.")]
    GatewayMalformedRequest,

    #[error("Could not find the session to load.")]
    NotFound { id: String },

    #[error("Sorry, we couldn't generate the audio for this explanation.")]
    AudioGenerationFailed,
}

impl TutorError {
    /// Transient errors auto-dismiss; the rest stay until the user acts.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EmptySubmission | Self::NotFound { .. })
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<GatewayError> for TutorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Blocked { reason } => Self::GatewayBlocked { reason },
            GatewayError::QuotaExceeded => Self::GatewayQuotaExceeded,
            GatewayError::AuthInvalid => Self::GatewayAuthInvalid,
            GatewayError::MalformedRequest(_) => Self::GatewayMalformedRequest,
            GatewayError::Unavailable(_) | GatewayError::NoAudio => Self::GatewayUnavailable,
        }
    }
}

impl From<RegistryError> for TutorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::EmptySession => Self::EmptySubmission,
            RegistryError::NotFound { id } => Self::NotFound { id },
        }
    }
}

impl From<AudioError> for TutorError {
    fn from(_: AudioError) -> Self {
        Self::AudioGenerationFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_failures_map_to_distinct_messages() {
        let messages: Vec<String> = [
            GatewayError::Blocked {
                reason: "SAFETY".into(),
            },
            GatewayError::QuotaExceeded,
            GatewayError::AuthInvalid,
            GatewayError::Unavailable("503".into()),
            GatewayError::MalformedRequest("400".into()),
        ]
        .into_iter()
        .map(|err| TutorError::from(err).user_message())
        .collect();

        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(messages[0], "The response was blocked. Reason: SAFETY.");
    }

    #[test]
    fn transient_classification() {
        assert!(TutorError::EmptySubmission.is_transient());
        assert!(TutorError::NotFound { id: "x".into() }.is_transient());
        assert!(!TutorError::GatewayUnavailable.is_transient());
        assert!(!TutorError::AudioGenerationFailed.is_transient());
    }
}
