//! QR-код для ссылки доступа VPN.

use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("Не удалось закодировать QR: {0}")]
    Encode(#[from] qrcode::types::QrError),
    #[error("Не удалось записать PNG: {0}")]
    Image(#[from] image::ImageError),
}

/// PNG с QR-кодом для `payload`; содержимое не проверяется.
pub fn build_qr_png_bytes(payload: &str) -> Result<Vec<u8>, QrError> {
    let qr = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)?;
    let image = qr
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(512, 512)
        .build();
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
