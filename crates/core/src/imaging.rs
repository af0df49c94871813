//! Raster encoding and thumbnail sizing.

use crate::error::ShelfResult;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use pdf_engine::{PageSize, RgbaImage};
use shelf_cache::PreviewFormat;
use std::io::Cursor;

pub fn encode(image: &RgbaImage, format: PreviewFormat) -> ShelfResult<Vec<u8>> {
    let mut bytes = Vec::new();

    match format {
        PreviewFormat::Png => {
            image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        }
        PreviewFormat::Jpg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
        }
    }

    Ok(bytes)
}

/// `data:image/png;base64,...` for a PNG-encoded image.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Scale to render a thumbnail at.
///
/// The requested scale is raised to `min_scale`, then lowered if needed so
/// neither side of the page exceeds `max_dimension`.
pub fn thumbnail_scale(page: PageSize, requested: f32, min_scale: f32, max_dimension: u32) -> f32 {
    let scale = requested.max(min_scale);
    let longest = page.width_pt.max(page.height_pt);

    if longest <= 0.0 {
        return scale;
    }

    let cap = max_dimension as f32 / longest;
    scale.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_round_trips_through_the_image_crate() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let bytes = encode(&image, PreviewFormat::Png).unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
    }

    #[test]
    fn jpeg_encoding_drops_alpha() {
        let image = RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 128]));
        let bytes = encode(&image, PreviewFormat::Jpg).unwrap();

        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn data_url_has_png_prefix() {
        assert_eq!(png_data_url(b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn thumbnail_scale_is_floored_then_capped() {
        let letter = PageSize::LETTER;

        assert_eq!(thumbnail_scale(letter, 0.01, 0.1, 200), 0.1);
        let capped = thumbnail_scale(letter, 1.0, 0.1, 200);
        assert!((letter.height_pt * capped - 200.0).abs() < 0.01);
    }
}
