use anyhow::Result;
use image::{DynamicImage, Luma};
use qrcode::QrCode;
use std::io::Cursor;

/// Pixels per QR module.
const MODULE_SIZE: u32 = 10;

/// Render `data` as a PNG QR code with the standard four-module quiet zone.
pub fn generate_qr_png(data: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(data)?;
    let image = code
        .render::<Luma<u8>>()
        .module_dimensions(MODULE_SIZE, MODULE_SIZE)
        .quiet_zone(true)
        .build();

    let dynamic_image = DynamicImage::ImageLuma8(image);
    let mut buffer = Cursor::new(Vec::new());
    dynamic_image.write_to(&mut buffer, image::ImageOutputFormat::Png)?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn renders_png() {
        let png = generate_qr_png("http://localhost:5000/api/tokens/alice/package").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width() % MODULE_SIZE, 0);
        assert_eq!(decoded.width(), decoded.height());
    }
}
