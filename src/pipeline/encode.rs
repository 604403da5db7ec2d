//! Page encoding: rendered `DynamicImage` → base64 PNG [`ImageData`].
//!
//! Spec-book pages are dense with small print (tolerances, gauge tables,
//! footnotes), so pages are sent as lossless PNG with `detail: "high"`. JPEG
//! artefacts around glyphs and the single low-detail tile both cost
//! extraction accuracy on exactly the numbers the rules depend on.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type of every encoded page.
pub const PAGE_MIME_TYPE: &str = "image/png";

/// Encode one rendered page for a vision request.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} page: {} PNG bytes, {} base64 bytes",
        img.width(),
        img.height(),
        png.len(),
        b64.len()
    );

    Ok(ImageData::new(b64, PAGE_MIME_TYPE).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn encoded_page_is_base64_png() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(12, 16, Luma([200])));
        let data = encode_page(&img).unwrap();
        assert_eq!(data.mime_type, PAGE_MIME_TYPE);

        let png = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let back = image::load_from_memory(&png).unwrap();
        assert_eq!((back.width(), back.height()), (12, 16));
    }
}
