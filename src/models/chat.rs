use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Body of `GET /api/payment/builder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderMessage {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A chat message; `content` is either plain text or a list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Value,
}

impl ModelMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: Value::String(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: Value::String(text.into()) }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ModelMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub messages: Vec<ModelMessage>,
}

/// File returned by `GET /api/payment/store`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDownload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    #[serde(rename = "size", serialize_with = "serialize_len")]
    pub bytes: Vec<u8>,
}

fn serialize_len<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(bytes.len() as u64)
}

/// Extracts the file name from a `Content-Disposition` header value.
pub fn attachment_file_name(disposition: &str) -> Option<String> {
    let mut fallback = None;

    for part in disposition.split(';').map(str::trim) {
        if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        } else if let Some(encoded) = part.strip_prefix("filename*=") {
            // RFC 5987: charset'lang'value
            fallback = encoded.rsplit('\'').next().map(|s| s.trim_matches('"').to_string());
        }
    }

    fallback.filter(|name| !name.is_empty())
}
