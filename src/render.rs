//! Turning a loaded page into a result buffer

use crate::{JobKind, RenderContent, RenderEngine, RenderError};
use image::imageops::FilterType;
use image::GenericImageView;
use std::io::Cursor;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Pause between resizing the viewport and capturing it, so layout and
/// paint can catch up. A heuristic: nothing guarantees paint is done.
pub const CAPTURE_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Upper bound on the viewport height used for a full-document capture
pub const MAX_CAPTURE_HEIGHT: u32 = 16_384;

/// Run the strategy for `kind` against an engine whose page has settled.
pub async fn run_strategy(
    engine: &dyn RenderEngine,
    kind: JobKind,
    width: u32,
) -> Result<RenderContent, RenderError> {
    match kind {
        JobKind::ContentExtraction => extract_content(engine).await.map(RenderContent::Html),
        JobKind::ImageCapture => capture_image(engine, width).await.map(RenderContent::Png),
    }
}

pub async fn extract_content(engine: &dyn RenderEngine) -> Result<String, RenderError> {
    engine
        .read_serialized_document()
        .await
        .map_err(|e| match e {
            RenderError::Extraction(_) => e,
            other => RenderError::Extraction(other.to_string()),
        })
}

/// Capture the whole document as a PNG `width` pixels wide.
pub async fn capture_image(engine: &dyn RenderEngine, width: u32) -> Result<Vec<u8>, RenderError> {
    capture_image_inner(engine, width).await.map_err(|e| match e {
        RenderError::Capture(_) => e,
        other => RenderError::Capture(other.to_string()),
    })
}

async fn capture_image_inner(engine: &dyn RenderEngine, width: u32) -> Result<Vec<u8>, RenderError> {
    let height = engine.measure_content_height().await?.clamp(1, MAX_CAPTURE_HEIGHT);
    debug!("Capturing {}x{}", width, height);

    engine.resize_viewport(width, height).await?;
    sleep(CAPTURE_SETTLE_DELAY).await;

    let png = engine.capture_pixels().await?;
    normalize_width(png, width)
}

/// Scale a PNG to `width`, keeping its aspect ratio. Engines running at a
/// device scale factor above one hand back wider captures than asked for.
pub fn normalize_width(png: Vec<u8>, width: u32) -> Result<Vec<u8>, RenderError> {
    let img = image::load_from_memory(&png)?;
    let (current_width, current_height) = img.dimensions();

    if current_width == width || current_width == 0 {
        return Ok(png);
    }

    let height = ((current_height as u64 * width as u64) / current_width as u64).max(1) as u32;
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);

    let mut out = Vec::new();
    resized.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
    Ok(out)
}
