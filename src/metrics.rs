/// What one rasterizer pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderMetrics {
    pub width: u32,
    pub height: u32,
    pub working_side: f32,
    pub font: String,
    pub text_width: f32,
    pub text_height: f32,
    pub rows: usize,
    pub tiles: usize,
    pub render_ms: f64,
}

/// Timings of a full encode request, whichever path served it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeMetrics {
    pub strategy: &'static str,
    pub fell_back: bool,
    pub encode_ms: f64,
    pub bytes: usize,
}
