use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    #[serde(rename = "model", alias = "tutor")]
    Tutor,
}

/// Which screen the session is showing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Welcome,
    PracticeBrowser,
    Chat,
}

/// Generation mode handed to the gateway for a single call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasoningMode {
    Fast,
    Extended,
}

impl ReasoningMode {
    pub fn from_toggle(extended: bool) -> Self {
        if extended { Self::Extended } else { Self::Fast }
    }

    pub fn is_extended(self) -> bool {
        matches!(self, Self::Extended)
    }
}

/// One message of the conversation.
///
/// Fields are private so a turn cannot change speaker once built; the
/// serialized names match the documents browser builds of the tutor wrote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(rename = "role")]
    speaker: Speaker,
    #[serde(rename = "content", default)]
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<ImageData>,
    #[serde(
        rename = "wasThinking",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    extended_reasoning: Option<bool>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            image: None,
            extended_reasoning: None,
        }
    }

    /// Seed turn of a session started from a photo: the image is the whole message.
    pub fn user_image(image: ImageData) -> Self {
        Self {
            speaker: Speaker::User,
            text: String::new(),
            image: Some(image),
            extended_reasoning: None,
        }
    }

    pub fn tutor(text: impl Into<String>, extended_reasoning: bool) -> Self {
        Self {
            speaker: Speaker::Tutor,
            text: text.into(),
            image: None,
            extended_reasoning: Some(extended_reasoning),
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn is_user(&self) -> bool {
        self.speaker == Speaker::User
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn image(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    pub fn extended_reasoning(&self) -> Option<bool> {
        self.extended_reasoning
    }

    /// Checks the shape rules a stored turn must satisfy before it is trusted.
    pub fn is_well_formed(&self) -> bool {
        match self.speaker {
            Speaker::User => {
                self.extended_reasoning.is_none()
                    && (!self.text.is_empty() || self.image.is_some())
            }
            Speaker::Tutor => self.image.is_none(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("not a base64 data URL")]
    InvalidDataUrl,

    #[error("unsupported image type: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// An encoded image in data-URL form (`data:<mime>;base64,<payload>`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageData {
    mime_type: String,
    payload: String,
}

impl ImageData {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            payload: STANDARD.encode(bytes),
        }
    }

    pub fn parse_data_url(url: &str) -> Result<Self, ImageError> {
        let rest = url.strip_prefix("data:").ok_or(ImageError::InvalidDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(ImageError::InvalidDataUrl)?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or(ImageError::InvalidDataUrl)?;
        if mime_type.is_empty() || payload.is_empty() {
            return Err(ImageError::InvalidDataUrl);
        }
        Ok(Self {
            mime_type: mime_type.to_string(),
            payload: payload.to_string(),
        })
    }

    /// Reads a photo from disk, inferring the mime type from its extension.
    pub async fn read_file(path: &Path) -> Result<Self, ImageError> {
        let mime_type = mime_for_path(path).ok_or_else(|| {
            ImageError::UnsupportedFormat(
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("<none>")
                    .to_string(),
            )
        })?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(mime_type, &bytes))
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn base64_payload(&self) -> &str {
        &self.payload
    }

    pub fn decode(&self) -> Result<Vec<u8>, ImageError> {
        Ok(STANDARD.decode(&self.payload)?)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.payload)
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl TryFrom<String> for ImageData {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_data_url(&value)
    }
}

impl From<ImageData> for String {
    fn from(image: ImageData) -> Self {
        image.to_data_url()
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_parsing() {
        let image = ImageData::parse_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.base64_payload(), "aGVsbG8=");
        assert_eq!(image.decode().unwrap(), b"hello");
        assert_eq!(image.to_data_url(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn test_data_url_rejects_garbage() {
        assert!(ImageData::parse_data_url("hello").is_err());
        assert!(ImageData::parse_data_url("data:image/png,abc").is_err());
        assert!(ImageData::parse_data_url("data:;base64,abc").is_err());
    }

    #[test]
    fn turn_serializes_with_browser_field_names() {
        let turn = ChatTurn::tutor("Try factoring first.", true);
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "model");
        assert_eq!(json["content"], "Try factoring first.");
        assert_eq!(json["wasThinking"], true);
        assert!(json.get("image").is_none());

        let user = ChatTurn::user_image(ImageData::from_bytes("image/jpeg", b"abc"));
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "");
        assert_eq!(json["image"], "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn turn_reads_legacy_documents() {
        let turn: ChatTurn =
            serde_json::from_str(r#"{"role":"model","content":"Hi there"}"#).unwrap();
        assert_eq!(turn.speaker(), Speaker::Tutor);
        assert_eq!(turn.extended_reasoning(), None);
        assert!(turn.is_well_formed());
    }

    #[test]
    fn well_formed_rules() {
        assert!(!ChatTurn::user("").is_well_formed());
        assert!(ChatTurn::user("x").is_well_formed());
        let bad: ChatTurn = serde_json::from_str(
            r#"{"role":"model","content":"x","image":"data:image/png;base64,YQ=="}"#,
        )
        .unwrap();
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/b.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("photo.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("noext")), None);
    }
}
