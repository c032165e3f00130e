use crate::assets::BackgroundImage;
use crate::error::WatermarkError;
use crate::font::{FontRegistry, FontSpec};
use crate::metrics::RenderMetrics;
use crate::style::parse_color;
use crate::types::{PixelSize, RenderingParameters, mm_to_px};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tiny_skia::{FillRule, FilterQuality, Paint, Pixmap, PixmapPaint, Transform};

pub const MAX_TILE_PLACEMENTS: usize = 2_000_000;

pub struct Surface {
    pixmap: Pixmap,
}

impl Surface {
    pub fn new(size: PixelSize) -> Result<Self, WatermarkError> {
        let pixmap = Pixmap::new(size.width, size.height).ok_or_else(|| {
            WatermarkError::CapabilityMissing(format!(
                "cannot allocate a {}x{} surface",
                size.width, size.height
            ))
        })?;
        Ok(Self { pixmap })
    }

    fn reset(&mut self, size: PixelSize) -> Result<(), WatermarkError> {
        if self.size() == size {
            self.pixmap.fill(tiny_skia::Color::TRANSPARENT);
            return Ok(());
        }
        *self = Surface::new(size)?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn size(&self) -> PixelSize {
        PixelSize {
            width: self.width(),
            height: self.height(),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let px = self.pixmap.pixel(x, y)?.demultiply();
        Some([px.red(), px.green(), px.blue(), px.alpha()])
    }

    pub fn fingerprint_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width().to_le_bytes());
        hasher.update(self.height().to_le_bytes());
        hasher.update(self.pixmap.data());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub(crate) fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Surface({}x{})", self.width(), self.height())
    }
}

// Twice the longest edge covers every corner at any rotation.
pub fn working_side(size: PixelSize) -> f32 {
    2.0 * size.longest_edge() as f32
}

pub fn working_transform(size: PixelSize, side: f32, rotation_degrees: f32) -> Transform {
    let half = side / 2.0;
    Transform::from_translate(size.width as f32 / 2.0, size.height as f32 / 2.0)
        .pre_concat(Transform::from_rotate(rotation_degrees))
        .pre_concat(Transform::from_translate(-half, -half))
}

// Row r starts at -(r * row_shift) reduced modulo advance_x, i.e. shifted by
// whole tiles into (-advance_x, 0].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileLayout {
    side: f64,
    advance_x: f64,
    advance_y: f64,
    row_shift: f64,
}

impl TileLayout {
    pub fn new(
        side: f32,
        advance_x: f32,
        advance_y: f32,
        row_shift: f32,
    ) -> Result<Self, WatermarkError> {
        if !(advance_x.is_finite() && advance_y.is_finite() && row_shift.is_finite()) {
            return Err(WatermarkError::Drawing(
                "tile advance must be finite".to_string(),
            ));
        }
        if advance_x <= 0.0 {
            return Err(WatermarkError::Drawing(format!(
                "horizontal advance (text width + row spacing) must be positive, got {advance_x}px"
            )));
        }
        if advance_y <= 0.0 {
            return Err(WatermarkError::Drawing(format!(
                "vertical advance (text height + column spacing) must be positive, got {advance_y}px"
            )));
        }
        let layout = Self {
            side: side.max(0.0) as f64,
            advance_x: advance_x as f64,
            advance_y: advance_y as f64,
            row_shift: row_shift as f64,
        };
        let placements = layout.placement_count();
        if placements > MAX_TILE_PLACEMENTS as f64 {
            return Err(WatermarkError::Drawing(format!(
                "tiling would place {placements:.0} copies of the text, limit is {MAX_TILE_PLACEMENTS}"
            )));
        }
        Ok(layout)
    }

    pub fn row_count(&self) -> usize {
        (self.side / self.advance_y).floor() as usize + 1
    }

    pub fn row_start(&self, row: usize) -> f32 {
        -((row as f64 * self.row_shift).rem_euclid(self.advance_x)) as f32
    }

    fn placement_count(&self) -> f64 {
        let rows = (self.side / self.advance_y).floor() + 1.0;
        if rows > MAX_TILE_PLACEMENTS as f64 {
            return rows;
        }
        rows * (((self.side + self.advance_x) / self.advance_x).floor() + 1.0)
    }

    pub fn origins(&self) -> TileOrigins<'_> {
        TileOrigins {
            layout: self,
            row: 0,
            col: 0,
        }
    }
}

pub struct TileOrigins<'a> {
    layout: &'a TileLayout,
    row: usize,
    col: usize,
}

impl Iterator for TileOrigins<'_> {
    type Item = (usize, f32, f32);

    fn next(&mut self) -> Option<Self::Item> {
        let layout = self.layout;
        loop {
            let y = self.row as f64 * layout.advance_y;
            if y > layout.side {
                return None;
            }
            let x = layout.row_start(self.row) as f64 + self.col as f64 * layout.advance_x;
            if x > layout.side {
                self.row += 1;
                self.col = 0;
                continue;
            }
            self.col += 1;
            return Some((self.row, x as f32, y as f32));
        }
    }
}

pub fn render(
    surface: Option<Surface>,
    params: &RenderingParameters,
    fonts: &FontRegistry,
) -> Result<Surface, WatermarkError> {
    render_with_metrics(surface, params, fonts).map(|(surface, _)| surface)
}

pub fn render_with_metrics(
    surface: Option<Surface>,
    params: &RenderingParameters,
    fonts: &FontRegistry,
) -> Result<(Surface, RenderMetrics), WatermarkError> {
    let started = Instant::now();
    let size = params.surface_size()?;
    let ppi = params.resolution_ppi;

    let font_size = mm_to_px(params.font_size_mm, ppi);
    let row_spacing = mm_to_px(params.row_spacing_mm, ppi);
    let col_spacing = mm_to_px(params.col_spacing_mm, ppi);
    let row_shift = mm_to_px(params.row_shift_mm, ppi);
    if !params.rotation_degrees.is_finite() {
        return Err(WatermarkError::Drawing(format!(
            "rotation must be finite, got {}",
            params.rotation_degrees
        )));
    }

    let side = working_side(size);
    let color = parse_color(&params.color)?;
    let spec = FontSpec::parse(&params.font_family, &params.font_weight, font_size)?;
    let face = fonts.resolve(&spec);
    let shaped = face.shape(&params.text, font_size)?;
    let text = shaped.metrics;

    let layout = match TileLayout::new(
        side,
        text.width + row_spacing,
        text.height() + col_spacing,
        row_shift,
    ) {
        Ok(layout) => Some(layout),
        // Nothing visible to place and no way to advance: the page stays blank.
        Err(_) if shaped.path.is_none() => None,
        Err(err) => return Err(err),
    };

    let mut surface = match surface {
        Some(mut existing) => {
            existing.reset(size)?;
            existing
        }
        None => Surface::new(size)?,
    };
    let pixmap = &mut surface.pixmap;
    pixmap.fill(tiny_skia::Color::WHITE);

    if let Some(background) = &params.background_image {
        draw_background(pixmap, background);
    }

    let transform = working_transform(size, side, params.rotation_degrees);
    // Tiles are placed by their vertical middle.
    let baseline = (text.ascent - text.descent) / 2.0;
    let mut paint = Paint::default();
    paint.set_color(color.to_sk_color());
    paint.anti_alias = true;

    let mut rows = 0usize;
    let mut tiles = 0usize;
    if let Some(layout) = &layout {
        for (row, x, y) in layout.origins() {
            if let Some(path) = &shaped.path {
                pixmap.fill_path(
                    path,
                    &paint,
                    FillRule::Winding,
                    transform.pre_concat(Transform::from_translate(x, y + baseline)),
                    None,
                );
            }
            rows = row + 1;
            tiles += 1;
        }
    }

    let metrics = RenderMetrics {
        width: size.width,
        height: size.height,
        working_side: side,
        font: face.name().to_string(),
        text_width: text.width,
        text_height: text.height(),
        rows,
        tiles,
        render_ms: started.elapsed().as_secs_f64() * 1000.0,
    };
    tracing::debug!(
        width = metrics.width,
        height = metrics.height,
        rows = metrics.rows,
        tiles = metrics.tiles,
        font = %metrics.font,
        render_ms = metrics.render_ms,
        "rasterized watermark"
    );
    Ok((surface, metrics))
}

fn draw_background(pixmap: &mut Pixmap, background: &BackgroundImage) {
    let src_w = background.width() as f32;
    let src_h = background.height() as f32;
    if src_w <= 0.0 || src_h <= 0.0 {
        return;
    }
    let sx = pixmap.width() as f32 / src_w;
    let sy = pixmap.height() as f32 / src_h;
    let mut paint = PixmapPaint::default();
    paint.quality = FilterQuality::Bilinear;
    pixmap.draw_pixmap(
        0,
        0,
        background.pixmap().as_ref(),
        &paint,
        Transform::from_scale(sx, sy),
        None,
    );
}
