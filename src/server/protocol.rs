//! JSON bodies exchanged between the browser/CLI front ends and the backend

use crate::blend::BlendMode;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/generate-prompt`. Every field is optional here so that
/// missing inputs can be reported as a 400 with a readable message.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePromptBody {
    pub image1: Option<String>,
    pub image2: Option<String>,
    pub blend_mode: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptResponse {
    pub prompt: Option<String>,
}

/// Body of `POST /api/generate-image`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GenerateImageBody {
    #[serde(default)]
    pub prompt: String,
}

/// A generated image as a bare base 64 string (no `data:` prefix)
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageResponse {
    pub image: Option<String>,
}

/// Body of every non-2xx response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: Option<String>,
}

/// One entry of `GET /api/blend-modes`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BlendModeInfo {
    pub label: String,
    pub description: String,
}

impl From<BlendMode> for BlendModeInfo {
    fn from(mode: BlendMode) -> Self {
        BlendModeInfo {
            label: mode.label().to_string(),
            description: mode.description().to_string(),
        }
    }
}
