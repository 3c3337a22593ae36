//! Variant planning: render every catalog resolution from one source image.

use bytes::Bytes;
use image::{DynamicImage, ImageError, codecs::jpeg::JpegEncoder, imageops::FilterType};
use thiserror::Error;
use tracing::warn;

use crate::domain::variants::{RESIZE_TARGETS, VariantLabel};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("unable to decode source image: {0}")]
    Decode(#[source] ImageError),
    #[error("unable to encode `{label}` variant: {source}")]
    Encode {
        label: VariantLabel,
        #[source]
        source: ImageError,
    },
}

/// One rendered variant ready for storage.
#[derive(Debug, Clone)]
pub struct PlannedVariant {
    pub label: VariantLabel,
    pub data: Bytes,
}

pub fn decode_source(data: &Bytes) -> Result<DynamicImage, PlanError> {
    image::load_from_memory(data).map_err(PlanError::Decode)
}

/// Encode as maximum-quality JPEG, matching the upstream's own encoding so
/// the native asset and local renders stay visually comparable.
pub fn encode_jpeg_max_quality(image: &DynamicImage) -> Result<Bytes, ImageError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, 100);
    // JPEG has no alpha channel; flatten to RGB before encoding.
    encoder.encode_image(&image.to_rgb8())?;
    Ok(Bytes::from(buffer))
}

/// Render every catalog resolution except the natively stored one.
///
/// A single failing target is logged and skipped rather than aborting the
/// whole plan; the remaining variants are still worth storing.
pub fn plan_variants(source: &DynamicImage, native: VariantLabel) -> Vec<PlannedVariant> {
    let mut planned = Vec::with_capacity(RESIZE_TARGETS.len());

    for &label in RESIZE_TARGETS {
        if label == native {
            continue;
        }
        let Some((width, height)) = label.dimensions() else {
            continue;
        };

        let resized = source.resize_to_fill(width, height, FilterType::Lanczos3);
        match encode_jpeg_max_quality(&resized) {
            Ok(data) => planned.push(PlannedVariant { label, data }),
            Err(err) => {
                warn!(%label, error = %err, "skipping unencodable variant");
            }
        }
    }

    planned
}
