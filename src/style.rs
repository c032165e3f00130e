use crate::error::WatermarkError;
use crate::types::Color;
use lightningcss::traits::Parse;
use lightningcss::values::color::{CssColor, SRGB};

/// Parses a CSS color (hex, named, `rgb()`/`rgba()`, `hsl()`...) into straight RGBA.
pub(crate) fn parse_color(raw: &str) -> Result<Color, WatermarkError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(WatermarkError::Drawing("empty color".to_string()));
    }
    let css = CssColor::parse_string(s)
        .map_err(|e| WatermarkError::Drawing(format!("malformed color '{s}': {e:?}")))?;
    let srgb = SRGB::try_from(&css)
        .map_err(|_| WatermarkError::Drawing(format!("color '{s}' has no sRGB value")))?;
    Ok(Color::rgba(
        srgb.r.clamp(0.0, 1.0),
        srgb.g.clamp(0.0, 1.0),
        srgb.b.clamp(0.0, 1.0),
        srgb.alpha.clamp(0.0, 1.0),
    ))
}

/// Numeric CSS font weight, 1..=1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FontWeight(pub u16);

impl FontWeight {
    pub const NORMAL: FontWeight = FontWeight(400);
    pub const BOLD: FontWeight = FontWeight(700);

    pub fn parse(raw: &str) -> Result<Self, WatermarkError> {
        let s = raw.trim().to_ascii_lowercase();
        // Relative keywords resolve against the default weight.
        let weight = match s.as_str() {
            "" | "normal" => Self::NORMAL,
            "bold" | "bolder" => Self::BOLD,
            "lighter" => FontWeight(100),
            _ => {
                let value: f32 = s.parse().map_err(|_| {
                    WatermarkError::Drawing(format!("malformed font weight '{}'", raw.trim()))
                })?;
                if !(1.0..=1000.0).contains(&value) {
                    return Err(WatermarkError::Drawing(format!(
                        "font weight {value} outside 1..=1000"
                    )));
                }
                FontWeight(value.round() as u16)
            }
        };
        Ok(weight)
    }

    pub fn is_bold(self) -> bool {
        self.0 >= 600
    }
}

/// Splits a CSS `font-family` list into bare family names.
///
/// An empty list falls back to `serif`, which is also appended as the last
/// resort when absent.
pub(crate) fn parse_family_stack(raw: &str) -> Result<Vec<String>, WatermarkError> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        let family = match (part.chars().next(), part.chars().last()) {
            (Some(open @ ('"' | '\'')), Some(close)) => {
                if part.len() < 2 || open != close {
                    return Err(WatermarkError::Drawing(format!(
                        "unbalanced quote in font family '{part}'"
                    )));
                }
                part[1..part.len() - 1].trim()
            }
            (_, Some('"' | '\'')) => {
                return Err(WatermarkError::Drawing(format!(
                    "unbalanced quote in font family '{part}'"
                )));
            }
            _ => part,
        };
        if family.chars().any(|c| c.is_control()) {
            return Err(WatermarkError::Drawing(format!(
                "control character in font family '{}'",
                family.escape_debug()
            )));
        }
        if !family.is_empty() {
            out.push(family.to_string());
        }
    }
    if !out.iter().any(|v| normalize_family(v) == "serif") {
        out.push("serif".to_string());
    }
    Ok(out)
}

pub(crate) fn normalize_family(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}
