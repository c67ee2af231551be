//! Encoded image attachments.
//!
//! An attachment is kept in the same self-describing form a renderer accepts:
//! `data:<mime>;base64,<payload>`. Decoding back into bytes is deferred until the
//! image is sent, so a malformed payload only surfaces at submission time.

use std::path::Path;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;

use crate::error::AttachmentError;

fn mime_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^data:([^;,]+);").expect("valid MIME pattern"))
}

/// An image in data-URL form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage(String);

/// Raw bytes and MIME type recovered from an [`EncodedImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    /// Encode raw image bytes. Rejects non-image MIME types.
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Result<Self, AttachmentError> {
        if !is_image_mime(mime_type) {
            return Err(AttachmentError::NotAnImage(mime_type.to_string()));
        }
        Ok(Self(format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))))
    }

    /// Wrap an existing data URL without validating it.
    pub fn from_data_url(data_url: impl Into<String>) -> Self {
        Self(data_url.into())
    }

    pub fn as_data_url(&self) -> &str {
        &self.0
    }

    pub fn mime_type(&self) -> Option<&str> {
        mime_pattern()
            .captures(&self.0)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Size of the decoded payload, estimated from the base64 length.
    pub fn approx_len(&self) -> usize {
        self.0
            .split_once(',')
            .map(|(_, payload)| payload.len() / 4 * 3)
            .unwrap_or(0)
    }

    pub fn decode(&self) -> Result<DecodedImage, AttachmentError> {
        let (header, payload) = self
            .0
            .split_once(',')
            .ok_or(AttachmentError::InvalidDataUrl)?;

        let mime_type = mime_pattern()
            .captures(header)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or(AttachmentError::MissingMimeType)?;

        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| AttachmentError::InvalidBase64(e.to_string()))?;

        Ok(DecodedImage { mime_type, bytes })
    }
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type
        .split_once('/')
        .map(|(kind, sub)| kind.eq_ignore_ascii_case("image") && !sub.is_empty())
        .unwrap_or(false)
}

/// Guess an image MIME type from a file extension.
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => return None,
    };
    Some(mime)
}
