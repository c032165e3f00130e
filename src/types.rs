use crate::assets::BackgroundImage;
use crate::error::WatermarkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// 1in = 25.4mm
pub const INCH_MM: f64 = 25.4;

/// Converts a physical length in millimetres to device pixels at `ppi`.
///
/// Every mm quantity in a render (paper edges, font size, spacing, row shift)
/// goes through this one formula.
pub fn mm_to_px(mm: f32, ppi: f32) -> f32 {
    mm_to_px_f64(mm as f64, ppi as f64) as f32
}

pub(crate) fn mm_to_px_f64(mm: f64, ppi: f64) -> f64 {
    mm / INCH_MM * ppi
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaperSize {
    A3,
    A4,
    A5,
    B4,
    B5,
}

impl PaperSize {
    pub const ALL: [PaperSize; 5] = [
        PaperSize::A3,
        PaperSize::A4,
        PaperSize::A5,
        PaperSize::B4,
        PaperSize::B5,
    ];

    /// Physical (width, height) in millimetres, portrait.
    pub fn dimensions_mm(self) -> (f32, f32) {
        match self {
            PaperSize::A3 => (297.0, 420.0),
            PaperSize::A4 => (210.0, 297.0),
            PaperSize::A5 => (148.0, 210.0),
            PaperSize::B4 => (250.0, 353.0),
            PaperSize::B5 => (176.0, 250.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaperSize::A3 => "A3",
            PaperSize::A4 => "A4",
            PaperSize::A5 => "A5",
            PaperSize::B4 => "B4",
            PaperSize::B5 => "B5",
        }
    }
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperSize {
    type Err = WatermarkError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim();
        PaperSize::ALL
            .into_iter()
            .find(|paper| paper.as_str().eq_ignore_ascii_case(key))
            .ok_or_else(|| WatermarkError::Drawing(format!("unsupported paper size '{key}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    /// Surface size for `paper` at `ppi`, rounded to the nearest whole pixel.
    pub fn for_paper(paper: PaperSize, ppi: f32) -> Result<Self, WatermarkError> {
        if !ppi.is_finite() || ppi <= 0.0 {
            return Err(WatermarkError::Drawing(format!(
                "resolution must be a positive number of pixels per inch, got {ppi}"
            )));
        }
        let (width_mm, height_mm) = paper.dimensions_mm();
        Ok(Self {
            width: mm_to_px_u32(width_mm, ppi)?,
            height: mm_to_px_u32(height_mm, ppi)?,
        })
    }

    pub fn longest_edge(self) -> u32 {
        self.width.max(self.height)
    }
}

fn mm_to_px_u32(mm: f32, ppi: f32) -> Result<u32, WatermarkError> {
    let px = mm_to_px_f64(mm as f64, ppi as f64).round();
    if px < 1.0 || px > u32::MAX as f64 {
        return Err(WatermarkError::Drawing(format!(
            "pixel dimension out of range: {px} for {mm}mm at {ppi}ppi"
        )));
    }
    Ok(px as u32)
}

/// Straight (non-premultiplied) RGBA color, components in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub(crate) fn to_sk_color(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
        .unwrap_or(tiny_skia::Color::BLACK)
    }
}

/// Everything one render needs. Built fresh for each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderingParameters {
    #[serde(rename = "paperSize")]
    pub paper_size: PaperSize,
    #[serde(rename = "resolutionPPI")]
    pub resolution_ppi: f32,
    pub text: String,
    /// Any CSS color: `#rgb`, `#rrggbb`, named colors, `rgb()`, `rgba()`, `hsl()`.
    pub color: String,
    #[serde(rename = "fontFamily")]
    pub font_family: String,
    #[serde(rename = "fontWeight")]
    pub font_weight: String,
    #[serde(rename = "fontSizeMM")]
    pub font_size_mm: f32,
    #[serde(rename = "rowSpacingMM")]
    pub row_spacing_mm: f32,
    #[serde(rename = "colSpacingMM")]
    pub col_spacing_mm: f32,
    #[serde(rename = "rotationDegrees")]
    pub rotation_degrees: f32,
    #[serde(rename = "rowShiftMM")]
    pub row_shift_mm: f32,
    #[serde(
        rename = "backgroundImage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub background_image: Option<BackgroundImage>,
}

impl Default for RenderingParameters {
    fn default() -> Self {
        Self {
            paper_size: PaperSize::A4,
            resolution_ppi: 300.0,
            text: String::new(),
            color: "rgba(0, 0, 0, 0.1)".to_string(),
            font_family: "serif".to_string(),
            font_weight: "400".to_string(),
            font_size_mm: 6.0,
            row_spacing_mm: 10.0,
            col_spacing_mm: 10.0,
            rotation_degrees: 315.0,
            row_shift_mm: 10.0,
            background_image: None,
        }
    }
}

impl RenderingParameters {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn surface_size(&self) -> Result<PixelSize, WatermarkError> {
        PixelSize::for_paper(self.paper_size, self.resolution_ppi)
    }

    /// Same parameters at a different resolution; everything else is untouched.
    pub fn at_resolution(&self, ppi: f32) -> Self {
        Self {
            resolution_ppi: ppi,
            ..self.clone()
        }
    }
}
