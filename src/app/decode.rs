//! Decode/resize engine
//!
//! Pure function from raw bytes plus size hints to a decoded bitmap. When the
//! source exceeds the target in both axes a thumbnail-style downsample is
//! used (cheaper for large sources); otherwise the image is decoded at full
//! size and scaled. Both paths scale against an aspect-fill crop rectangle and
//! center-crop, so the output dimensions always equal the target exactly —
//! crop, never letterbox. With no size hints the image is decoded at native
//! resolution and eagerly materialized to RGBA so no deferred decode can
//! surprise a UI-facing thread later.

use image::imageops::FilterType;
use image::GenericImageView;

use crate::app::request::{Bitmap, SizeMetrics};
use crate::errors::FetchError;

/// Decode raw bytes and resize/crop to the requested target dimensions
///
/// Returns `FetchError::CorruptImage` if the bytes cannot be decoded.
pub fn decode_and_resize(
    bytes: &[u8],
    metrics: Option<SizeMetrics>,
) -> Result<Bitmap, FetchError> {
    let image = image::load_from_memory(bytes).map_err(|e| {
        tracing::debug!("image decode failed: {}", e);
        FetchError::CorruptImage
    })?;

    let metrics = match metrics {
        // A zero-dimension target has no valid aspect ratio; treat it the
        // same as no size hints.
        Some(m) if !m.target.is_degenerate() => m,
        _ => {
            // Eager materialization pass; decode work happens here, not at
            // first draw.
            return Ok(Bitmap::ImageRgba8(image.to_rgba8()));
        }
    };

    let target = metrics.target;
    // Strategy is chosen from the caller-declared source size, but the scale
    // math uses the actual decoded dimensions so the crop stays in bounds
    // when the declaration is stale.
    let use_thumbnail =
        metrics.source.width > target.width && metrics.source.height > target.height;

    let (src_w, src_h) = image.dimensions();
    let (scaled_w, scaled_h) = scaled_dimensions(src_w, src_h, target.width, target.height);

    let resized = if use_thumbnail {
        image.thumbnail_exact(scaled_w, scaled_h)
    } else {
        image.resize_exact(scaled_w, scaled_h, FilterType::Triangle)
    };

    Ok(center_crop(&resized, target.width, target.height))
}

/// Dimensions of the source scaled so the aspect-fill crop rectangle for the
/// target fits exactly inside it
///
/// Equivalent to fitting the largest rectangle with the target's aspect ratio
/// inside the source, then scaling the whole source so that rectangle matches
/// the target. Rounding is clamped so the result never drops below the target
/// in either axis.
fn scaled_dimensions(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let target_aspect = f64::from(target_w) / f64::from(target_h);
    let crop_w = f64::from(src_w).min(f64::from(src_h) * target_aspect);
    let scale = f64::from(target_w) / crop_w;

    let scaled_w = ((f64::from(src_w) * scale).round() as u32).max(target_w);
    let scaled_h = ((f64::from(src_h) * scale).round() as u32).max(target_h);
    (scaled_w, scaled_h)
}

/// Crop the exact target rectangle out of the center of a bitmap
fn center_crop(image: &Bitmap, width: u32, height: u32) -> Bitmap {
    let (w, h) = image.dimensions();
    let x = (w - width) / 2;
    let y = (h - height) / 2;
    Bitmap::ImageRgba8(image::imageops::crop_imm(image, x, y, width, height).to_image())
}
