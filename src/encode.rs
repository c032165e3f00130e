use crate::error::WatermarkError;
use crate::raster::Surface;
use base64::Engine;
use image::ColorType;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIME: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
        }
    }
}

/// Requested serialization of a rendered surface.
///
/// `quality` is always in `(0, 1]`; PNG ignores it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputFormat {
    pub kind: ImageKind,
    pub quality: f32,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::png()
    }
}

impl OutputFormat {
    pub fn png() -> Self {
        Self {
            kind: ImageKind::Png,
            quality: 1.0,
        }
    }

    pub fn jpeg(quality: f32) -> Self {
        Self {
            kind: ImageKind::Jpeg,
            quality: normalize_quality(Some(quality)),
        }
    }

    /// Resolves a MIME type and quality the way a canvas `toDataURL` would:
    /// no type means PNG, unknown types fall back to PNG, and a missing or
    /// non-positive quality means full quality.
    pub fn from_mime(mime: Option<&str>, quality: Option<f32>) -> Self {
        let quality = normalize_quality(quality);
        let kind = match mime.map(|m| m.trim().to_ascii_lowercase()) {
            None => ImageKind::Png,
            Some(m) if m.is_empty() || m == "image/png" => ImageKind::Png,
            Some(m) if m == "image/jpeg" || m == "image/jpg" => ImageKind::Jpeg,
            Some(other) => {
                tracing::debug!(mime = %other, "unsupported output type, using image/png");
                ImageKind::Png
            }
        };
        Self { kind, quality }
    }

    /// Picks the format from a file extension, PNG when unknown.
    pub fn from_extension(ext: &str, quality: Option<f32>) -> Self {
        let mime = match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some("image/jpeg"),
            _ => None,
        };
        Self::from_mime(mime, quality)
    }

    pub fn mime(&self) -> &'static str {
        self.kind.mime()
    }

    fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

fn normalize_quality(quality: Option<f32>) -> f32 {
    match quality {
        Some(q) if q.is_finite() && q > 0.0 => q.min(1.0),
        _ => 1.0,
    }
}

pub fn encode_surface(surface: &Surface, format: OutputFormat) -> Result<Vec<u8>, WatermarkError> {
    let pixmap = surface.pixmap();
    match format.kind {
        ImageKind::Png => pixmap
            .encode_png()
            .map_err(|e| WatermarkError::Encoding(format!("png encode failed: {e}"))),
        ImageKind::Jpeg => {
            // No alpha in JPEG; composite onto white.
            let mut rgb = Vec::with_capacity(rgb_len(pixmap.width(), pixmap.height()));
            for px in pixmap.pixels() {
                let inv = 255 - px.alpha();
                rgb.push(px.red().saturating_add(inv));
                rgb.push(px.green().saturating_add(inv));
                rgb.push(px.blue().saturating_add(inv));
            }
            let mut out = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut out, format.jpeg_quality());
            encoder
                .encode(&rgb, pixmap.width(), pixmap.height(), ColorType::Rgb8.into())
                .map_err(|e| WatermarkError::Encoding(format!("jpeg encode failed: {e}")))?;
            Ok(out)
        }
    }
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

pub fn to_data_url(bytes: &[u8], format: OutputFormat) -> String {
    format!(
        "data:{};base64,{}",
        format.mime(),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub fn encode_data_url(surface: &Surface, format: OutputFormat) -> Result<String, WatermarkError> {
    let bytes = encode_surface(surface, format)?;
    Ok(to_data_url(&bytes, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::parse_data_url;
    use crate::types::PixelSize;

    fn small_surface() -> Surface {
        Surface::new(PixelSize {
            width: 8,
            height: 4,
        })
        .unwrap()
    }

    #[test]
    fn mime_resolution_defaults_to_png() {
        assert_eq!(OutputFormat::from_mime(None, None), OutputFormat::png());
        assert_eq!(OutputFormat::from_mime(Some("image/webp"), None).kind, ImageKind::Png);
        assert_eq!(OutputFormat::from_mime(Some(" IMAGE/JPEG "), None).kind, ImageKind::Jpeg);
        assert_eq!(OutputFormat::from_extension("JPG", None).kind, ImageKind::Jpeg);
        assert_eq!(OutputFormat::from_extension("tiff", None).kind, ImageKind::Png);
    }

    #[test]
    fn quality_is_normalized() {
        let cases = [
            (None, 1.0),
            (Some(0.0), 1.0),
            (Some(-2.0), 1.0),
            (Some(f32::NAN), 1.0),
            (Some(3.0), 1.0),
            (Some(0.25), 0.25),
        ];
        for (input, expected) in cases {
            let format = OutputFormat::from_mime(Some("image/jpeg"), input);
            assert_eq!(format.quality, expected, "{input:?}");
        }
        assert_eq!(OutputFormat::jpeg(0.001).jpeg_quality(), 1);
        assert_eq!(OutputFormat::jpeg(0.9).jpeg_quality(), 90);
    }

    #[test]
    fn png_output_decodes_to_same_size() {
        let bytes = encode_surface(&small_surface(), OutputFormat::png()).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[test]
    fn jpeg_output_has_jpeg_magic() {
        let bytes = encode_surface(&small_surface(), OutputFormat::jpeg(0.5)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
        // Transparent pixels come out white.
        let px = decoded.to_rgb8().get_pixel(0, 0).0;
        assert!(px.iter().all(|c| *c > 240), "{px:?}");
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn rgb_buffer_length_does_not_wrap_at_large_sizes() {
        // A3 at 3000 PPI.
        assert_eq!(rgb_len(35079, 49606), 35079 * 49606 * 3);
        assert_eq!(rgb_len(70_000, 70_000), 14_700_000_000);
    }

    #[test]
    fn data_url_carries_mime_and_payload() {
        let format = OutputFormat::from_mime(Some("image/jpeg"), Some(0.8));
        let url = encode_data_url(&small_surface(), format).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let (mime, data) = parse_data_url(&url).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
    }
}
