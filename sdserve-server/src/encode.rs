use std::io::Cursor;

use anyhow::Result;
use base64::{prelude::BASE64_STANDARD, Engine};
use image::DynamicImage;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Encodes an image as PNG and then base64.
pub fn image_to_base64_png(img: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

pub fn image_to_data_uri(img: &DynamicImage) -> Result<String> {
    Ok(format!("{PNG_DATA_URI_PREFIX}{}", image_to_base64_png(img)?))
}

/// Inverse of [`image_to_data_uri`]: the raw PNG bytes behind a data URI.
pub fn data_uri_to_png(uri: &str) -> Result<Vec<u8>> {
    let payload = uri
        .strip_prefix(PNG_DATA_URI_PREFIX)
        .ok_or_else(|| anyhow::anyhow!("not a PNG data URI"))?;
    Ok(BASE64_STANDARD.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn data_uri_holds_a_png() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(8, 4, Rgb([10u8, 20, 30])));
        let uri = image_to_data_uri(&img).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let png = data_uri_to_png(&uri).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
        assert_eq!(decoded.to_rgb8().get_pixel(3, 2).0, [10, 20, 30]);
    }

    #[test]
    fn rejects_other_uris() {
        assert!(data_uri_to_png("data:image/jpeg;base64,AAAA").is_err());
        assert!(data_uri_to_png("data:image/png;base64,***").is_err());
    }
}
