use crate::error::WatermarkError;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;

/// A decoded raster drawn beneath the watermark text.
///
/// The bitmap is shared behind an `Arc`, so handing it to a worker moves a
/// pointer rather than re-encoding the image. Equality compares a SHA-256 of
/// the pixel data.
#[derive(Clone)]
pub struct BackgroundImage {
    pixmap: Arc<Pixmap>,
    fingerprint: [u8; 32],
}

impl BackgroundImage {
    pub fn from_bytes(data: &[u8]) -> Result<Self, WatermarkError> {
        Self::decode(data, None)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WatermarkError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::decode(&bytes, None)
    }

    pub fn from_data_url(url: &str) -> Result<Self, WatermarkError> {
        let (mime, data) = parse_data_url(url)
            .ok_or_else(|| WatermarkError::Drawing("malformed data URL".to_string()))?;
        Self::decode(&data, Some(&mime))
    }

    /// Accepts either a `data:` URL or a filesystem path.
    pub fn load(source: &str) -> Result<Self, WatermarkError> {
        if source.starts_with("data:") {
            Self::from_data_url(source)
        } else {
            Self::from_path(source)
        }
    }

    pub(crate) fn from_pixmap(pixmap: Pixmap) -> Self {
        let fingerprint = pixmap_fingerprint(&pixmap);
        Self {
            pixmap: Arc::new(pixmap),
            fingerprint,
        }
    }

    fn decode(data: &[u8], mime: Option<&str>) -> Result<Self, WatermarkError> {
        let pixmap = decode_image_to_pixmap(data, mime)?;
        Ok(Self::from_pixmap(pixmap))
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub(crate) fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Lossless PNG data URL of the decoded bitmap.
    pub fn to_data_url(&self) -> Result<String, WatermarkError> {
        let png = self
            .pixmap
            .encode_png()
            .map_err(|e| WatermarkError::Encoding(format!("png encode failed: {e}")))?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}

impl PartialEq for BackgroundImage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pixmap, &other.pixmap) || self.fingerprint == other.fingerprint
    }
}

impl fmt::Debug for BackgroundImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("fingerprint", &&self.fingerprint_hex()[..12])
            .finish()
    }
}

impl Serialize for BackgroundImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let url = self.to_data_url().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&url)
    }
}

impl<'de> Deserialize<'de> for BackgroundImage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        BackgroundImage::load(&source).map_err(serde::de::Error::custom)
    }
}

fn pixmap_fingerprint(pixmap: &Pixmap) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pixmap.width().to_le_bytes());
    hasher.update(pixmap.height().to_le_bytes());
    hasher.update(pixmap.data());
    hasher.finalize().into()
}

pub(crate) fn decode_image_to_pixmap(
    data: &[u8],
    mime: Option<&str>,
) -> Result<Pixmap, WatermarkError> {
    let guessed_format = if let Some(mime) = mime {
        if mime.contains("png") {
            Some(image::ImageFormat::Png)
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Some(image::ImageFormat::Jpeg)
        } else {
            None
        }
    } else {
        image::guess_format(data).ok()
    };

    let decoded = match guessed_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt),
        None => image::load_from_memory(data),
    }
    .map_err(|e| WatermarkError::Drawing(format!("background image decode failed: {e}")))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        WatermarkError::Drawing(format!("background image has unusable size {width}x{height}"))
    })?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Ok(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

/// Splits a `data:` URL into its MIME type and decoded payload.
pub fn parse_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    if !url.starts_with("data:") {
        return None;
    }
    let (header, payload) = url.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}
