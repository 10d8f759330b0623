//! The fixed set of blend modes offered to the user

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named style label. The set is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BlendMode {
    /// Merge both subjects into a single coherent scene
    Fuse,

    /// Render the content of the first image in the style of the second
    StyleTransfer,

    /// Overlay one image inside the silhouette of the other
    DoubleExposure,

    /// Recombine both images into a surreal, dreamlike composition
    Dreamscape,

    /// Arrange elements of both images as a layered collage
    Collage,
}

impl BlendMode {
    pub const ALL: [BlendMode; 5] = [
        BlendMode::Fuse,
        BlendMode::StyleTransfer,
        BlendMode::DoubleExposure,
        BlendMode::Dreamscape,
        BlendMode::Collage,
    ];

    /// The label shown to users and sent over the wire
    pub fn label(&self) -> &'static str {
        match self {
            BlendMode::Fuse => "Fuse",
            BlendMode::StyleTransfer => "Style Transfer",
            BlendMode::DoubleExposure => "Double Exposure",
            BlendMode::Dreamscape => "Dreamscape",
            BlendMode::Collage => "Collage",
        }
    }

    /// How the mode should steer the wording of the descriptive prompt
    pub fn description(&self) -> &'static str {
        match self {
            BlendMode::Fuse => {
                "merge the main subjects of both images into one coherent, seamless scene"
            }
            BlendMode::StyleTransfer => {
                "depict the content of the first image rendered in the artistic style, palette and texture of the second"
            }
            BlendMode::DoubleExposure => {
                "a double exposure where one image is visible inside the silhouette of the other"
            }
            BlendMode::Dreamscape => {
                "a surreal, dreamlike composition that recombines elements of both images in impossible ways"
            }
            BlendMode::Collage => {
                "a layered collage that arranges cut-out elements of both images into a single composition"
            }
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown blend mode {0:?}")]
pub struct UnknownBlendMode(pub String);

impl FromStr for BlendMode {
    type Err = UnknownBlendMode;

    /// Case-insensitive; spaces, dashes and underscores are interchangeable
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalize = |s: &str| {
            s.trim()
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '_'))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        };
        let wanted = normalize(s);

        BlendMode::ALL
            .into_iter()
            .find(|mode| normalize(mode.label()) == wanted)
            .ok_or_else(|| UnknownBlendMode(s.to_string()))
    }
}

impl TryFrom<String> for BlendMode {
    type Error = UnknownBlendMode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BlendMode> for String {
    fn from(mode: BlendMode) -> String {
        mode.label().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip() {
        for mode in BlendMode::ALL {
            assert_eq!(mode.label().parse::<BlendMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!("fuse".parse::<BlendMode>().unwrap(), BlendMode::Fuse);
        assert_eq!(
            "style-transfer".parse::<BlendMode>().unwrap(),
            BlendMode::StyleTransfer
        );
        assert_eq!(
            " DOUBLE_EXPOSURE ".parse::<BlendMode>().unwrap(),
            BlendMode::DoubleExposure
        );
        assert!("mosaic".parse::<BlendMode>().is_err());
        assert!("".parse::<BlendMode>().is_err());
    }

    #[test]
    fn test_serde_as_label() {
        let json = serde_json::to_string(&BlendMode::StyleTransfer).unwrap();
        assert_eq!(json, "\"Style Transfer\"");
        let mode: BlendMode = serde_json::from_str("\"Dreamscape\"").unwrap();
        assert_eq!(mode, BlendMode::Dreamscape);
    }
}
