mod assets;
mod debug;
mod dispatch;
mod encode;
mod error;
mod font;
mod metrics;
mod preview;
mod raster;
mod style;
mod types;
mod worker;

pub use assets::{BackgroundImage, parse_data_url};
pub use debug::TraceLog;
pub use dispatch::{Dispatcher, InlineStrategy, OffThreadStrategy, PendingRender, RenderStrategy};
pub use encode::{DEFAULT_MIME, ImageKind, OutputFormat, encode_data_url, encode_surface, to_data_url};
pub use error::WatermarkError;
pub use font::FontRegistry;
pub use metrics::{EncodeMetrics, RenderMetrics};
pub use preview::{PREVIEW_PPI, PreviewEvent, PreviewFrame, PreviewLoop};
pub use raster::{
    MAX_TILE_PLACEMENTS, Surface, TileLayout, render, render_with_metrics, working_side,
    working_transform,
};
pub use types::{Color, INCH_MM, PaperSize, PixelSize, RenderingParameters, mm_to_px};
pub use worker::{DrawRequest, WorkerFault, WorkerRequest, WorkerResponse, handle, serve_lines};

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Renders tiled text watermarks and hands them out as encoded images.
pub struct Watermarker {
    fonts: Arc<FontRegistry>,
    dispatcher: Arc<Dispatcher>,
    trace: Option<TraceLog>,
}

#[derive(Clone)]
pub struct WatermarkerBuilder {
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(String, Vec<u8>)>,
    system_fonts: bool,
    off_thread: bool,
    worker_threads: usize,
    trace_path: Option<PathBuf>,
}

impl Default for WatermarkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkerBuilder {
    /// Defaults, then `TILEMARK_INLINE` and `TILEMARK_TRACE` from the environment.
    pub fn new() -> Self {
        let worker_threads = std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(1);
        Self {
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            system_fonts: true,
            off_thread: !env_flag("TILEMARK_INLINE"),
            worker_threads,
            trace_path: std::env::var_os("TILEMARK_TRACE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.font_bytes.push((name.into(), data));
        self
    }

    /// Whether host font directories are searched. Off means registered fonts
    /// or notdef boxes only, which renders identically on every machine.
    pub fn system_fonts(mut self, enabled: bool) -> Self {
        self.system_fonts = enabled;
        self
    }

    pub fn off_thread(mut self, enabled: bool) -> Self {
        self.off_thread = enabled;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn trace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Watermarker, WatermarkError> {
        if self.off_thread && self.worker_threads == 0 {
            return Err(WatermarkError::InvalidConfiguration(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        let mut registry = FontRegistry::new();
        registry.set_system_fonts(self.system_fonts);
        for dir in &self.font_dirs {
            if !dir.is_dir() {
                return Err(WatermarkError::InvalidConfiguration(format!(
                    "font directory not found: {}",
                    dir.display()
                )));
            }
            let added = registry.register_dir(dir);
            tracing::debug!(dir = %dir.display(), added, "registered font directory");
        }
        for file in &self.font_files {
            registry.register_file(file)?;
        }
        for (name, data) in self.font_bytes {
            registry.register_bytes(data, Some(&name))?;
        }
        let trace = match &self.trace_path {
            Some(path) => Some(TraceLog::new(path)?),
            None => None,
        };
        let fonts = Arc::new(registry);
        let dispatcher = Dispatcher::new(
            Arc::clone(&fonts),
            self.off_thread,
            self.worker_threads,
            trace.clone(),
        );
        Ok(Watermarker {
            fonts,
            dispatcher: Arc::new(dispatcher),
            trace,
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl Watermarker {
    pub fn builder() -> WatermarkerBuilder {
        WatermarkerBuilder::new()
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.fonts
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Rasterizes on the calling thread.
    pub fn render(&self, params: &RenderingParameters) -> Result<Surface, WatermarkError> {
        self.render_with_metrics(params).map(|(surface, _)| surface)
    }

    /// Rasterizes into an existing surface, resizing it as needed.
    pub fn render_into(
        &self,
        surface: Surface,
        params: &RenderingParameters,
    ) -> Result<Surface, WatermarkError> {
        render(Some(surface), params, &self.fonts)
    }

    pub fn render_with_metrics(
        &self,
        params: &RenderingParameters,
    ) -> Result<(Surface, RenderMetrics), WatermarkError> {
        let (surface, metrics) = render_with_metrics(None, params, &self.fonts)?;
        if let Some(trace) = &self.trace {
            trace.event(
                "render",
                json!({
                    "width": metrics.width,
                    "height": metrics.height,
                    "rows": metrics.rows,
                    "tiles": metrics.tiles,
                    "font": metrics.font,
                    "ms": metrics.render_ms,
                }),
            );
            trace.increment("render", 1);
        }
        Ok((surface, metrics))
    }

    /// Encodes through the dispatcher: background first, inline on failure.
    pub fn encode(
        &self,
        params: &RenderingParameters,
        format: OutputFormat,
    ) -> Result<String, WatermarkError> {
        self.dispatcher.encode(params, format)
    }

    pub fn render_to_data_url(&self, params: &RenderingParameters) -> Result<String, WatermarkError> {
        self.encode(params, OutputFormat::png())
    }

    pub fn render_to_bytes(
        &self,
        params: &RenderingParameters,
        format: OutputFormat,
    ) -> Result<Vec<u8>, WatermarkError> {
        let url = self.encode(params, format)?;
        parse_data_url(&url)
            .map(|(_, data)| data)
            .ok_or_else(|| WatermarkError::Encoding("renderer returned a malformed data URL".into()))
    }

    /// Writes the encoded image; with no explicit format the file extension
    /// picks one.
    pub fn render_to_file(
        &self,
        params: &RenderingParameters,
        path: impl AsRef<Path>,
        format: Option<OutputFormat>,
    ) -> Result<OutputFormat, WatermarkError> {
        let path = path.as_ref();
        let format = format.unwrap_or_else(|| {
            let ext = path.extension().and_then(|v| v.to_str()).unwrap_or("");
            OutputFormat::from_extension(ext, None)
        });
        let bytes = self.render_to_bytes(params, format)?;
        std::fs::write(path, bytes)?;
        Ok(format)
    }

    pub fn preview(
        &self,
        sink: impl FnMut(PreviewEvent) + Send + 'static,
    ) -> Result<PreviewLoop, WatermarkError> {
        PreviewLoop::new(Arc::clone(&self.dispatcher), sink)
    }
}

impl Drop for Watermarker {
    fn drop(&mut self) {
        if let Some(trace) = &self.trace {
            trace.emit_summary("watermarker");
            trace.flush();
        }
    }
}
