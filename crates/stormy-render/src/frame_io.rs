//! Frame loading and saving.
//! Decodes PNG, JPEG, EXR and the other `image` formats into float frame buffers.

use std::path::Path;

use stormy_core::{FrameBuffer, PixelFormat, StormyError, StormyResult};

/// Load an image file as an RGBA float frame. 8-bit channels map to 0..1.
pub fn load_frame(path: &Path) -> StormyResult<FrameBuffer> {
    let img = image::open(path).map_err(|e| {
        StormyError::Image(format!("failed to load image '{}': {}", path.display(), e))
    })?;
    Ok(from_dynamic(img))
}

/// Decode an in-memory image.
pub fn load_frame_from_bytes(data: &[u8]) -> StormyResult<FrameBuffer> {
    let img = image::load_from_memory(data)
        .map_err(|e| StormyError::Image(format!("failed to decode image: {}", e)))?;
    Ok(from_dynamic(img))
}

fn from_dynamic(img: image::DynamicImage) -> FrameBuffer {
    let rgba = img.to_rgba32f();
    let (width, height) = rgba.dimensions();
    let mut fb = FrameBuffer::new(width, height, PixelFormat::RgbaFloat);
    fb.data = rgba.into_raw();
    fb
}

/// Save a frame. `.exr` keeps full float precision; every other format is
/// quantized to 8 bits with HDR values clamped.
pub fn save_frame(frame: &FrameBuffer, path: &Path) -> StormyResult<()> {
    let is_exr = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exr"));

    let result = if is_exr {
        image::Rgba32FImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| invalid_buffer(frame))?
            .save(path)
    } else {
        image::RgbaImage::from_raw(frame.width, frame.height, frame.to_rgba8())
            .ok_or_else(|| invalid_buffer(frame))?
            .save(path)
    };
    result.map_err(|e| StormyError::Image(format!("failed to save '{}': {}", path.display(), e)))?;
    tracing::debug!("wrote {}x{} frame to {}", frame.width, frame.height, path.display());
    Ok(())
}

fn invalid_buffer(frame: &FrameBuffer) -> StormyError {
    StormyError::Image(format!(
        "frame data does not match its {}x{} size",
        frame.width, frame.height
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormy_core::Color;

    #[test]
    fn test_load_frame_missing_file() {
        let result = load_frame(Path::new("/nonexistent/image.png"));
        assert!(matches!(result, Err(StormyError::Image(_))));
    }

    #[test]
    fn test_load_invalid_bytes() {
        assert!(load_frame_from_bytes(&[0, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_png_save_and_load() {
        let path = std::env::temp_dir().join(format!("stormy-frame-{}.png", std::process::id()));
        let frame = FrameBuffer::solid(6, 4, &Color::rgb(1.0, 0.5, 0.0));
        save_frame(&frame, &path).unwrap();

        let loaded = load_frame(&path).unwrap();
        assert_eq!(loaded.size(), frame.size());
        let px = loaded.texel(3, 2);
        assert_eq!(px[0], 1.0);
        assert!((px[1] - 0.5).abs() < 0.01);
        assert_eq!(px[3], 1.0);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_mismatched_buffer_is_rejected() {
        let mut frame = FrameBuffer::solid(4, 4, &Color::RED);
        frame.data.truncate(8);
        let path = std::env::temp_dir().join("stormy-never-written.png");
        assert!(matches!(save_frame(&frame, &path), Err(StormyError::Image(_))));
    }
}
