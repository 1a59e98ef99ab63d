//! Shelf preview thumbnails.
//!
//! Image artifacts get a small PNG preview, carried on the artifact as
//! base64 so callers can render it without touching the original bytes
//! again. Generation is best-effort: anything that fails to decode
//! simply has no preview.

use base64::Engine;
use tracing::debug;

use docshelf_core::artifact::Thumbnail;

/// Longest edge of a generated preview, in pixels.
const THUMB_EDGE: u32 = 128;

/// Build a preview for image bytes. Returns `None` when the bytes do
/// not decode as a supported image format.
pub fn image_thumbnail(bytes: &[u8]) -> Option<Thumbnail> {
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            debug!(error = %e, "Thumbnail decode failed");
            return None;
        }
    };

    // `thumbnail` preserves aspect ratio within the bounding box.
    let preview = img.thumbnail(THUMB_EDGE, THUMB_EDGE);
    let mut png = std::io::Cursor::new(Vec::new());
    if let Err(e) = preview.write_to(&mut png, image::ImageFormat::Png) {
        debug!(error = %e, "Thumbnail encode failed");
        return None;
    }

    Some(Thumbnail {
        png_base64: base64::engine::general_purpose::STANDARD.encode(png.into_inner()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_of(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 120])
        });
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        png.into_inner()
    }

    #[test]
    fn preview_fits_the_bounding_box() {
        let thumb = image_thumbnail(&png_of(640, 200)).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&thumb.png_base64)
            .unwrap();
        let preview = image::load_from_memory(&decoded).unwrap();
        assert!(preview.width() <= 128);
        assert!(preview.height() <= 128);
        // Aspect ratio survives the resize.
        assert!(preview.width() > preview.height());
    }

    #[test]
    fn small_image_keeps_its_dimensions() {
        let thumb = image_thumbnail(&png_of(40, 30)).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&thumb.png_base64)
            .unwrap();
        let preview = image::load_from_memory(&decoded).unwrap();
        assert_eq!((preview.width(), preview.height()), (40, 30));
    }

    #[test]
    fn garbage_bytes_yield_no_preview() {
        assert!(image_thumbnail(b"definitely not an image").is_none());
    }
}
