//! Image intake: turns user-supplied files into `EncodedImage`s, the
//! self-describing `data:` URL form the rest of the crate passes around.

use base64::{
    alphabet,
    engine::{self, general_purpose},
    Engine as _,
};
use image::ImageFormat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Standard alphabet, padded, tolerant of non-zero trailing bits. Payloads
/// come from browsers and model APIs that do not always canonicalize them.
const BASE64: engine::GeneralPurpose = engine::GeneralPurpose::new(
    &alphabet::STANDARD,
    general_purpose::PAD.with_decode_allow_trailing_bits(true),
);

/// Errors produced while encoding or parsing an image
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("could not read image file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),
}

/// An image encoded as base 64 along with its MIME type. Immutable once
/// created; rendered as `data:<mime>;base64,<data>`.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime_type: String,
    data: String,
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EncodedImage {{ mime_type: {:?}, data: <{} bytes of base64> }}",
            self.mime_type,
            self.data.len()
        )
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}

impl EncodedImage {
    /// Wrap an already base 64 encoded payload. The payload is checked to be
    /// valid base 64 but its content is not inspected.
    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self, IntakeError> {
        let mime_type = mime_type.trim();
        let data = data.trim();
        if mime_type.is_empty() || !mime_type.contains('/') {
            return Err(IntakeError::InvalidDataUrl(format!(
                "bad MIME type {mime_type:?}"
            )));
        }
        BASE64
            .decode(data)
            .map_err(|e| IntakeError::InvalidDataUrl(e.to_string()))?;

        Ok(EncodedImage {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    /// Encode raw image bytes, sniffing the MIME type from the magic bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IntakeError> {
        let format = image::guess_format(bytes)
            .map_err(|e| IntakeError::UnsupportedFormat(e.to_string()))?;
        Ok(Self::encode(bytes, format))
    }

    /// Read and encode an image file. The format is sniffed from the content
    /// first and from the file extension second.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;

        let format = match image::guess_format(&bytes) {
            Ok(format) => format,
            Err(_) => ImageFormat::from_path(path).map_err(|_| {
                IntakeError::UnsupportedFormat(format!("{}", path.display()))
            })?,
        };

        debug!(
            "encoded {} ({} bytes) as {}",
            path.display(),
            bytes.len(),
            format.to_mime_type()
        );

        Ok(Self::encode(&bytes, format))
    }

    /// Parse a `data:<mime>;base64,<data>` URL
    pub fn parse_data_url(url: &str) -> Result<Self, IntakeError> {
        let rest = url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| IntakeError::InvalidDataUrl("missing `data:` scheme".into()))?;
        let (mime_type, data) = rest
            .split_once(";base64,")
            .ok_or_else(|| IntakeError::InvalidDataUrl("missing `;base64,` marker".into()))?;

        Self::from_base64(mime_type, data)
    }

    fn encode(bytes: &[u8], format: ImageFormat) -> Self {
        EncodedImage {
            mime_type: format.to_mime_type().to_string(),
            data: BASE64.encode(bytes),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The base 64 payload, without the `data:` prefix
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Decode the payload back into raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }

    /// A file extension matching the MIME type, if it is a known one
    pub fn extension(&self) -> Option<&'static str> {
        ImageFormat::from_mime_type(&self.mime_type)
            .and_then(|format| format.extensions_str().first().copied())
    }
}

impl FromStr for EncodedImage {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_data_url(s)
    }
}

impl Serialize for EncodedImage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EncodedImage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn test_parse_data_url() {
        let image = EncodedImage::parse_data_url("data:image/png;base64,AA==").unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.data(), "AA==");
        assert_eq!(image.to_string(), "data:image/png;base64,AA==");
        assert_eq!(image.to_bytes().unwrap(), vec![0]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "image/png;base64,AA==",
            "data:image/png,AA==",
            "data:;base64,AA==",
            "data:image/png;base64,not base64!",
        ] {
            assert!(
                matches!(
                    EncodedImage::parse_data_url(bad),
                    Err(IntakeError::InvalidDataUrl(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_bytes_sniffs_png() {
        let image = EncodedImage::from_bytes(PNG_MAGIC).unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.to_bytes().unwrap(), PNG_MAGIC);
        assert_eq!(image.extension(), Some("png"));
    }

    #[test]
    fn test_from_bytes_rejects_unknown() {
        assert!(matches!(
            EncodedImage::from_bytes(b"hello world"),
            Err(IntakeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_debug_elides_payload() {
        let image = EncodedImage::from_base64("image/jpeg", "ZZ==").unwrap();
        let debug = format!("{image:?}");
        assert!(debug.contains("image/jpeg"));
        assert!(!debug.contains("ZZ=="));
    }

    #[test]
    fn test_serde_uses_data_url() {
        let image = EncodedImage::from_base64("image/png", "BB==").unwrap();
        let json = serde_json::to_string(&image).unwrap();
        assert_eq!(json, "\"data:image/png;base64,BB==\"");
        let back: EncodedImage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, image);
    }

    #[tokio::test]
    async fn test_from_path() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(PNG_MAGIC).unwrap();

        let image = EncodedImage::from_path(file.path()).await.unwrap();
        assert_eq!(image.mime_type(), "image/png");
    }

    #[tokio::test]
    async fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EncodedImage::from_path(dir.path().join("nope.png")).await;
        assert!(matches!(result, Err(IntakeError::Io(_))));
    }
}
