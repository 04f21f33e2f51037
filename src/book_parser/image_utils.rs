//! 封面图片转码。

use image::GenericImageView;

const COVER_QUALITY: u8 = 90;
const COVER_MAX_DIM: u32 = 1600;

// ── JPEG 转码 ───────────────────────────────────────────────────

/// 任意格式（jpeg/png/webp）解码后统一转为 JPEG，过大的图片按长边缩放。
pub(crate) fn cover_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    convert_to_jpeg(bytes, COVER_QUALITY, COVER_MAX_DIM)
}

fn convert_to_jpeg(bytes: &[u8], quality: u8, max_dim: u32) -> Result<Vec<u8>, image::ImageError> {
    let mut img = image::load_from_memory(bytes)?;

    if max_dim > 0 {
        let (w, h) = img.dimensions();
        let longest = w.max(h);
        if longest > max_dim {
            let scale = max_dim as f32 / longest as f32;
            let nw = ((w as f32) * scale).round().max(1.0) as u32;
            let nh = ((h as f32) * scale).round().max(1.0) as u32;
            img = img.resize_exact(nw, nh, image::imageops::FilterType::Lanczos3);
        }
    }

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let q = quality.clamp(1, 100);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, q);
    encoder.encode(
        &rgb,
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}
