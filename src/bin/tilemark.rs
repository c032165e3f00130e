use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tilemark::{
    BackgroundImage, FontRegistry, OutputFormat, PaperSize, RenderingParameters, Watermarker,
    serve_lines,
};

/// Tiled text watermark renderer
#[derive(Parser, Debug)]
#[command(name = "tilemark")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a watermark to a file or print it as a data URL
    Render(RenderArgs),
    /// Serve draw requests as JSON lines on stdin/stdout
    Worker {
        /// Extra directory of .ttf/.otf fonts
        #[arg(long)]
        font_dir: Vec<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// JSON file with rendering parameters; flags given alongside override it
    #[arg(long)]
    params: Option<PathBuf>,

    #[arg(long)]
    text: Option<String>,

    #[arg(long)]
    paper: Option<PaperSize>,

    #[arg(long)]
    ppi: Option<f32>,

    /// Any CSS color
    #[arg(long)]
    color: Option<String>,

    #[arg(long)]
    font_family: Option<String>,

    #[arg(long)]
    font_weight: Option<String>,

    #[arg(long)]
    font_size_mm: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    row_spacing_mm: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    col_spacing_mm: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    rotation: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    row_shift_mm: Option<f32>,

    /// Image file or data URL drawn under the text
    #[arg(long)]
    background: Option<String>,

    /// Output file; prints a data URL when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// MIME type of the output (image/png, image/jpeg)
    #[arg(long)]
    format: Option<String>,

    /// Encoder quality in (0, 1]
    #[arg(long)]
    quality: Option<f32>,

    /// Render on the calling thread
    #[arg(long)]
    inline: bool,

    #[arg(long)]
    font_dir: Vec<PathBuf>,

    /// Do not search host font directories
    #[arg(long)]
    no_system_fonts: bool,

    /// JSON-lines trace file
    #[arg(long)]
    trace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    match cli.command {
        Command::Render(args) => run_render(args),
        Command::Worker { font_dir } => run_worker(font_dir),
    }
}

fn run_render(args: RenderArgs) -> Result<()> {
    let params = load_params(&args)?;

    let mut builder = Watermarker::builder()
        .system_fonts(!args.no_system_fonts)
        .off_thread(!args.inline);
    for dir in &args.font_dir {
        builder = builder.register_font_dir(dir);
    }
    if let Some(path) = &args.trace {
        builder = builder.trace_path(path);
    }
    let engine = builder.build().context("failed to configure renderer")?;

    let explicit = args
        .format
        .as_deref()
        .map(|mime| OutputFormat::from_mime(Some(mime), args.quality));
    match &args.output {
        Some(path) => {
            let explicit = explicit.or_else(|| {
                args.quality.map(|q| {
                    let ext = path.extension().and_then(|v| v.to_str()).unwrap_or("");
                    OutputFormat::from_extension(ext, Some(q))
                })
            });
            let format = engine
                .render_to_file(&params, path, explicit)
                .with_context(|| format!("failed to render {}", path.display()))?;
            tracing::info!(path = %path.display(), mime = format.mime(), "wrote watermark");
        }
        None => {
            let format = explicit.unwrap_or_else(|| OutputFormat::from_mime(None, args.quality));
            let url = engine.encode(&params, format).context("failed to render")?;
            let mut out = io::stdout().lock();
            writeln!(out, "{url}")?;
        }
    }
    Ok(())
}

fn load_params(args: &RenderArgs) -> Result<RenderingParameters> {
    let mut params = match &args.params {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid parameters in {}", path.display()))?
        }
        None => RenderingParameters::default(),
    };
    if let Some(v) = &args.text {
        params.text = v.clone();
    }
    if let Some(v) = args.paper {
        params.paper_size = v;
    }
    if let Some(v) = args.ppi {
        params.resolution_ppi = v;
    }
    if let Some(v) = &args.color {
        params.color = v.clone();
    }
    if let Some(v) = &args.font_family {
        params.font_family = v.clone();
    }
    if let Some(v) = &args.font_weight {
        params.font_weight = v.clone();
    }
    if let Some(v) = args.font_size_mm {
        params.font_size_mm = v;
    }
    if let Some(v) = args.row_spacing_mm {
        params.row_spacing_mm = v;
    }
    if let Some(v) = args.col_spacing_mm {
        params.col_spacing_mm = v;
    }
    if let Some(v) = args.rotation {
        params.rotation_degrees = v;
    }
    if let Some(v) = args.row_shift_mm {
        params.row_shift_mm = v;
    }
    if let Some(source) = &args.background {
        params.background_image = Some(
            BackgroundImage::load(source).context("failed to load background image")?,
        );
    }
    // An empty text from a parameter file is a deliberate blank page.
    if args.params.is_none() && args.text.is_none() {
        bail!("nothing to draw: pass --text or --params");
    }
    Ok(params)
}

fn run_worker(font_dirs: Vec<PathBuf>) -> Result<()> {
    let mut fonts = FontRegistry::new();
    for dir in &font_dirs {
        fonts.register_dir(dir);
    }
    let stdin = io::stdin();
    let stdout = io::stdout();
    let served = serve_lines(stdin.lock(), stdout.lock(), &fonts).context("worker I/O failed")?;
    tracing::debug!(served, "worker input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_args(argv: &[&str]) -> RenderArgs {
        let mut full = vec!["tilemark", "render"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Render(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn empty_text_parameter_file_renders_blank_page() {
        let path = std::env::temp_dir().join(format!("tilemark-cli-{}-empty.json", std::process::id()));
        let params = RenderingParameters {
            paper_size: PaperSize::A5,
            resolution_ppi: 20.0,
            ..RenderingParameters::default()
        };
        std::fs::write(&path, serde_json::to_string(&params).unwrap()).unwrap();

        let args = render_args(&["--params", path.to_str().unwrap(), "--inline"]);
        let loaded = load_params(&args).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(loaded.text.is_empty());

        let engine = Watermarker::builder()
            .system_fonts(false)
            .off_thread(false)
            .build()
            .unwrap();
        let surface = engine.render(&loaded).unwrap();
        for y in 0..surface.height() {
            for x in 0..surface.width() {
                assert_eq!(surface.pixel(x, y).unwrap(), [255, 255, 255, 255], "({x},{y})");
            }
        }
    }

    #[test]
    fn bare_invocation_still_asks_for_text() {
        let args = render_args(&["--inline"]);
        assert!(load_params(&args).is_err());
        let args = render_args(&["--text", "DRAFT", "--rotation", "-45"]);
        let params = load_params(&args).unwrap();
        assert_eq!(params.text, "DRAFT");
        assert_eq!(params.rotation_degrees, -45.0);
    }
}
