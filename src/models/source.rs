use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{ Deserialize, Serialize };

/// A user-supplied file kept in memory and sent along with generation calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// What clients get to see about an attached source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub name: String,
    pub mime_type: String,
    pub size: usize,
}

impl Source {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Accepts a bare base64 payload or a `data:<mime>;base64,<payload>` URL.
    pub fn from_base64(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        payload: &str
    ) -> Result<Self, base64::DecodeError> {
        let encoded = match payload.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => payload,
        };
        let data = STANDARD.decode(encoded.trim())?;
        Ok(Self::new(name, mime_type, data))
    }

    pub fn base64_data(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.data.len(),
        }
    }
}
