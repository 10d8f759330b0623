//! The two collaborators the pipeline delegates to: a prompt-synthesis
//! service that describes a blend of two images, and an image-synthesis
//! service that turns that description into pixels.

use crate::intake::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod gemini;
pub mod mock;
pub mod proxy;

pub use gemini::GeminiClient;
pub use proxy::ProxyClient;

/// A failed exchange with an external service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// The service answered with a non-success status
    #[error("service responded with status {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Status {
        status: u16,
        message: Option<String>,
    },

    /// The request never got a response
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Malformed(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

/// Everything the describe step needs. Doubles as the wire body of
/// `POST /api/generate-prompt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    pub image1: EncodedImage,
    pub image2: EncodedImage,
    pub blend_mode: String,

    /// The user's guidance text, already defaulted when it was blank
    #[serde(rename = "prompt")]
    pub guidance: String,
}

/// Output configuration for the generate step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub number_of_images: u32,
    pub output_mime_type: String,
    pub aspect_ratio: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            number_of_images: 1,
            output_mime_type: "image/jpeg".to_string(),
            aspect_ratio: "1:1".to_string(),
        }
    }
}

/// Prompt synthesis: two images plus a blend mode in, descriptive text out
#[async_trait]
pub trait PromptService: Send + Sync {
    /// `Ok(None)` means the service answered but produced no usable text
    async fn describe(&self, request: &DescribeRequest) -> Result<Option<String>, ServiceError>;
}

/// Image synthesis: descriptive text in, one base 64 image payload out
#[async_trait]
pub trait ImageService: Send + Sync {
    /// `Ok(None)` means the service answered but returned no image payload
    async fn generate(
        &self,
        prompt: &str,
        config: &ImageConfig,
    ) -> Result<Option<String>, ServiceError>;
}

/// Build the instruction sent to a multimodal model for the describe step
pub fn describe_instruction(blend_mode: &str, guidance: &str) -> String {
    let style = match blend_mode.parse::<crate::blend::BlendMode>() {
        Ok(mode) => format!("{} ({})", mode.label(), mode.description()),
        Err(_) => blend_mode.trim().to_string(),
    };

    format!(
        "You are writing a prompt for an image generation model. Study the two \
         images provided and describe a single new image that combines them.\n\
         Blend mode: {style}.\n\
         User guidance: {guidance}\n\
         Describe the subjects, composition, lighting, colour palette and artistic \
         style in one detailed paragraph. Respond with the prompt text only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_request_wire_shape() {
        let request = DescribeRequest {
            image1: "data:image/png;base64,AA==".parse().unwrap(),
            image2: "data:image/png;base64,BB==".parse().unwrap(),
            blend_mode: "Fuse".into(),
            guidance: "make it glow".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "image1": "data:image/png;base64,AA==",
                "image2": "data:image/png;base64,BB==",
                "blendMode": "Fuse",
                "prompt": "make it glow",
            })
        );
    }

    #[test]
    fn test_image_config_defaults() {
        let json = serde_json::to_value(ImageConfig::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "numberOfImages": 1,
                "outputMimeType": "image/jpeg",
                "aspectRatio": "1:1",
            })
        );
    }

    #[test]
    fn test_instruction_mentions_mode_and_guidance() {
        let text = describe_instruction("double exposure", "autumn colours");
        assert!(text.contains("Double Exposure"));
        assert!(text.contains("silhouette"));
        assert!(text.contains("autumn colours"));

        let custom = describe_instruction("Mosaic", "tiles");
        assert!(custom.contains("Blend mode: Mosaic."));
    }
}
