//! Thumbnails for secured images

use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageFormat;

use crate::error::{Result, VaultError};

/// Longest edge of a generated thumbnail, in pixels.
pub const THUMBNAIL_SIZE: u32 = 256;

/// Decode an image and re-encode a bounded JPEG preview.
///
/// CPU bound; call it from a blocking task.
pub fn render_thumbnail(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data).map_err(|e| VaultError::Thumbnail(e.to_string()))?;

    let resized = if img.width() > THUMBNAIL_SIZE || img.height() > THUMBNAIL_SIZE {
        img.resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle)
    } else {
        img
    };

    let mut buffer = Vec::new();
    resized
        .to_rgb8()
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .map_err(|e| VaultError::Thumbnail(e.to_string()))?;
    Ok(buffer)
}

/// Async wrapper running [`render_thumbnail`] off the executor threads.
pub async fn render_thumbnail_blocking(data: bytes::Bytes) -> Result<Vec<u8>> {
    core_async::task::spawn_blocking(move || render_thumbnail(&data))
        .await
        .map_err(|e| VaultError::Thumbnail(format!("thumbnail task failed: {}", e)))?
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([30, 120, 200]),
    ));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}
