//! The variant catalog and storage key layout.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Encoding used for every stored variant.
pub const VARIANT_FORMAT: &str = "jpg";

/// A named target resolution.
///
/// `Uhd` is special: it has no fixed dimensions and is only ever stored
/// as-is from the upstream native asset, never produced by resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VariantLabel {
    Uhd,
    R1920x1080,
    R1366x768,
    R1280x720,
    R1024x768,
    R800x600,
    R800x480,
    R640x480,
    R640x360,
    R480x360,
    R400x240,
    R320x240,
}

impl VariantLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uhd => "UHD",
            Self::R1920x1080 => "1920x1080",
            Self::R1366x768 => "1366x768",
            Self::R1280x720 => "1280x720",
            Self::R1024x768 => "1024x768",
            Self::R800x600 => "800x600",
            Self::R800x480 => "800x480",
            Self::R640x480 => "640x480",
            Self::R640x360 => "640x360",
            Self::R480x360 => "480x360",
            Self::R400x240 => "400x240",
            Self::R320x240 => "320x240",
        }
    }

    /// Pixel dimensions for resizable targets; `None` for UHD.
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Self::Uhd => None,
            Self::R1920x1080 => Some((1920, 1080)),
            Self::R1366x768 => Some((1366, 768)),
            Self::R1280x720 => Some((1280, 720)),
            Self::R1024x768 => Some((1024, 768)),
            Self::R800x600 => Some((800, 600)),
            Self::R800x480 => Some((800, 480)),
            Self::R640x480 => Some((640, 480)),
            Self::R640x360 => Some((640, 360)),
            Self::R480x360 => Some((480, 360)),
            Self::R400x240 => Some((400, 240)),
            Self::R320x240 => Some((320, 240)),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        RESIZE_TARGETS
            .iter()
            .copied()
            .chain(std::iter::once(Self::Uhd))
            .find(|label| label.as_str() == value)
    }
}

impl fmt::Display for VariantLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for VariantLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown variant label `{value}`"))
    }
}

impl From<VariantLabel> for String {
    fn from(label: VariantLabel) -> Self {
        label.as_str().to_string()
    }
}

/// Resize targets in catalog order, largest first. The native asset (UHD or
/// 1920x1080, depending on the probe) is stored as-is and excluded from
/// re-rendering at plan time.
pub const RESIZE_TARGETS: &[VariantLabel] = &[
    VariantLabel::R1920x1080,
    VariantLabel::R1366x768,
    VariantLabel::R1280x720,
    VariantLabel::R1024x768,
    VariantLabel::R800x600,
    VariantLabel::R800x480,
    VariantLabel::R640x480,
    VariantLabel::R640x360,
    VariantLabel::R480x360,
    VariantLabel::R400x240,
    VariantLabel::R320x240,
];

/// Storage key layout shared by the fetcher, the resolver and retention:
/// `{content_id}/{content_id}_{variant}.{format}`.
pub fn storage_key(content_id: &str, label: VariantLabel, format: &str) -> String {
    format!("{content_id}/{content_id}_{label}.{format}")
}
