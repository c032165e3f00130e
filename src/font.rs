use crate::error::WatermarkError;
use crate::style::{FontWeight, normalize_family, parse_family_stack};
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tiny_skia::{PathBuilder, Rect};
use ttf_parser::{GlyphId, OutlineBuilder};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FontSpec {
    pub families: Vec<String>,
    pub weight: FontWeight,
    pub size_px: f32,
}

impl FontSpec {
    pub fn parse(family: &str, weight: &str, size_px: f32) -> Result<Self, WatermarkError> {
        if !size_px.is_finite() || size_px < 0.0 {
            return Err(WatermarkError::Drawing(format!(
                "font size must be a non-negative number, got {size_px}px"
            )));
        }
        Ok(Self {
            families: parse_family_stack(family)?,
            weight: FontWeight::parse(weight)?,
            size_px,
        })
    }
}

#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, Vec<usize>>,
    system_fonts: bool,
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) data: Arc<Vec<u8>>,
    pub(crate) bold: bool,
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            system_fonts: true,
        }
    }

    pub fn set_system_fonts(&mut self, enabled: bool) {
        self.system_fonts = enabled;
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) -> usize {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return 0;
        };
        let mut added = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && has_font_extension(&path) && self.register_file(&path).is_ok() {
                added += 1;
            }
        }
        added
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<String, WatermarkError> {
        let path = path.as_ref();
        if !has_font_extension(path) {
            return Err(WatermarkError::InvalidConfiguration(format!(
                "not a .ttf/.otf font: {}",
                path.display()
            )));
        }
        let data = fs::read(path)?;
        self.register_bytes(data, path.to_str())
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, WatermarkError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let (name, aliases, bold) = {
            let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
                return Err(WatermarkError::InvalidConfiguration(format!(
                    "invalid font data for {source}"
                )));
            };
            let (name, aliases) = font_names(&face, Path::new(source));
            (name, aliases, face.weight().to_number() >= 600)
        };

        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data: Arc::new(data),
            bold,
        });
        let mut all_aliases = vec![name.clone()];
        all_aliases.extend(aliases);
        for alias in all_aliases {
            let key = normalize_family(&alias);
            if key.is_empty() {
                continue;
            }
            let slot = self.lookup.entry(key).or_default();
            if !slot.contains(&index) {
                slot.push(index);
            }
        }
        Ok(name)
    }

    fn registered(&self, family: &str, bold: bool) -> Option<&RegisteredFont> {
        let indices = self.lookup.get(&normalize_family(family))?;
        indices
            .iter()
            .filter_map(|index| self.fonts.get(*index))
            .find(|font| font.bold == bold)
            .or_else(|| indices.first().and_then(|index| self.fonts.get(*index)))
    }

    pub(crate) fn resolve(&self, spec: &FontSpec) -> Typeface {
        let bold = spec.weight.is_bold();
        for family in &spec.families {
            if let Some(font) = self.registered(family, bold) {
                return Typeface::Outline {
                    name: font.name.clone(),
                    data: font.data.clone(),
                };
            }
            if !self.system_fonts {
                continue;
            }
            if let Some(data) = resolve_system_font_bytes(family, bold) {
                return Typeface::Outline {
                    name: family.clone(),
                    data,
                };
            }
        }
        static WARNED: AtomicBool = AtomicBool::new(false);
        if self.system_fonts && !WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                families = ?spec.families,
                "no usable font file found; drawing notdef boxes"
            );
        }
        Typeface::Notdef
    }
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn has_font_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|v| v.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
        .unwrap_or(false)
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = family
        .clone()
        .or_else(|| full.clone())
        .or_else(|| post.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());

    let mut aliases = Vec::new();
    for candidate in [full, post, stem].into_iter().flatten() {
        if candidate != primary {
            aliases.push(candidate);
        }
    }
    (primary, aliases)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TextMetrics {
    pub width: f32,
    pub ascent: f32,
    pub descent: f32,
}

impl TextMetrics {
    pub fn height(&self) -> f32 {
        self.ascent + self.descent
    }
}

// Baseline at y = 0, y grows downward.
#[derive(Debug, Clone)]
pub(crate) struct ShapedText {
    pub metrics: TextMetrics,
    pub path: Option<tiny_skia::Path>,
}

#[derive(Debug, Clone)]
pub(crate) enum Typeface {
    Outline { name: String, data: Arc<Vec<u8>> },
    Notdef,
}

const NOTDEF_ADVANCE_EM: f32 = 0.6;
const NOTDEF_ASCENT_EM: f32 = 0.8;
const NOTDEF_DESCENT_EM: f32 = 0.2;

impl Typeface {
    pub fn name(&self) -> &str {
        match self {
            Typeface::Outline { name, .. } => name,
            Typeface::Notdef => "notdef",
        }
    }

    pub fn shape(&self, text: &str, size_px: f32) -> Result<ShapedText, WatermarkError> {
        match self {
            Typeface::Outline { name, data } => shape_outline(name, data, text, size_px),
            Typeface::Notdef => Ok(shape_notdef(text, size_px)),
        }
    }
}

fn shape_outline(
    name: &str,
    data: &[u8],
    text: &str,
    size_px: f32,
) -> Result<ShapedText, WatermarkError> {
    let Some(hb_face) = HbFace::from_slice(data, 0) else {
        return Err(WatermarkError::Drawing(format!("font '{name}' cannot be shaped")));
    };
    let Ok(face) = ttf_parser::Face::parse(data, 0) else {
        return Err(WatermarkError::Drawing(format!("font '{name}' cannot be parsed")));
    };
    let units = hb_face.units_per_em().max(1) as f32;
    let scale = size_px / units;
    let ascent = face.ascender() as f32 * scale;
    let descent = -(face.descender() as f32) * scale;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&hb_face, &[], buffer);

    let mut builder = GlyphPathBuilder::new(scale);
    let mut pen_x = 0.0f32;
    for (info, pos) in output
        .glyph_infos()
        .iter()
        .zip(output.glyph_positions().iter())
    {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            builder.set_origin(
                pen_x + pos.x_offset as f32 * scale,
                -(pos.y_offset as f32) * scale,
            );
            let _ = face.outline_glyph(GlyphId(gid), &mut builder);
        }
        pen_x += pos.x_advance as f32 * scale;
    }

    Ok(ShapedText {
        metrics: TextMetrics {
            width: pen_x.max(0.0),
            ascent,
            descent,
        },
        path: builder.finish(),
    })
}

fn shape_notdef(text: &str, size_px: f32) -> ShapedText {
    let advance = NOTDEF_ADVANCE_EM * size_px;
    let mut builder = PathBuilder::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        if !ch.is_whitespace() {
            if let Some(rect) =
                Rect::from_xywh(pen_x + 0.05 * size_px, -0.7 * size_px, 0.5 * size_px, 0.7 * size_px)
            {
                builder.push_rect(rect);
            }
        }
        pen_x += advance;
    }
    ShapedText {
        metrics: TextMetrics {
            width: pen_x,
            ascent: NOTDEF_ASCENT_EM * size_px,
            descent: NOTDEF_DESCENT_EM * size_px,
        },
        path: builder.finish(),
    }
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x: 0.0,
            origin_y: 0.0,
            scale,
        }
    }

    fn set_origin(&mut self, x: f32, y: f32) {
        self.origin_x = x;
        self.origin_y = y;
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }

    fn finish(self) -> Option<tiny_skia::Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

static SYSTEM_FONT_CACHE: OnceLock<Mutex<HashMap<String, Option<Arc<Vec<u8>>>>>> = OnceLock::new();

fn resolve_system_font_bytes(family: &str, bold: bool) -> Option<Arc<Vec<u8>>> {
    let family = normalize_family(family);
    if family.is_empty() {
        return None;
    }
    let key = format!("{family}|{}", if bold { "bold" } else { "regular" });
    let cache = SYSTEM_FONT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(guard) = cache.lock() {
        if let Some(entry) = guard.get(&key) {
            return entry.clone();
        }
    }

    let loaded = load_system_font(&family, bold);
    if let Ok(mut guard) = cache.lock() {
        guard.insert(key, loaded.clone());
    }
    loaded
}

fn load_system_font(family: &str, bold: bool) -> Option<Arc<Vec<u8>>> {
    let mut candidates = system_font_file_candidates(family, bold);
    if candidates.is_empty() {
        // Synthesize likely file names from the family itself.
        let compact = family.replace(' ', "");
        let title: String = family
            .split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect();
        if bold {
            candidates.push(format!("{title}-Bold.ttf"));
            candidates.push(format!("{compact}bd.ttf"));
        }
        candidates.push(format!("{title}-Regular.ttf"));
        candidates.push(format!("{title}.ttf"));
        candidates.push(format!("{compact}.ttf"));
    }

    for dir in system_font_dirs() {
        for file_name in &candidates {
            if let Some(bytes) = find_font_file(&dir, file_name, 3) {
                return Some(Arc::new(bytes));
            }
        }
    }
    None
}

fn find_font_file(dir: &Path, file_name: &str, depth: usize) -> Option<Vec<u8>> {
    if let Ok(bytes) = fs::read(dir.join(file_name)) {
        if ttf_parser::Face::parse(&bytes, 0).is_ok() {
            return Some(bytes);
        }
    }
    if depth == 0 {
        return None;
    }
    let entries = fs::read_dir(dir).ok()?;
    let mut subdirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    subdirs
        .iter()
        .find_map(|sub| find_font_file(sub, file_name, depth - 1))
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(extra) = std::env::var("TILEMARK_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".fonts"));
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

fn system_font_file_candidates(family: &str, bold: bool) -> Vec<String> {
    let mut out = Vec::new();
    match canonical_family_alias(family).as_str() {
        "sans-serif" | "system-ui" | "ui-sans-serif" => extend_weight_candidates(
            &mut out,
            bold,
            &[
                "arial.ttf",
                "segoeui.ttf",
                "DejaVuSans.ttf",
                "NotoSans-Regular.ttf",
                "LiberationSans-Regular.ttf",
            ],
            &[
                "arialbd.ttf",
                "segoeuib.ttf",
                "DejaVuSans-Bold.ttf",
                "NotoSans-Bold.ttf",
                "LiberationSans-Bold.ttf",
            ],
        ),
        "serif" | "ui-serif" => extend_weight_candidates(
            &mut out,
            bold,
            &[
                "times.ttf",
                "Times New Roman.ttf",
                "DejaVuSerif.ttf",
                "NotoSerif-Regular.ttf",
                "LiberationSerif-Regular.ttf",
            ],
            &[
                "timesbd.ttf",
                "Times New Roman Bold.ttf",
                "DejaVuSerif-Bold.ttf",
                "NotoSerif-Bold.ttf",
                "LiberationSerif-Bold.ttf",
            ],
        ),
        "monospace" | "ui-monospace" => extend_weight_candidates(
            &mut out,
            bold,
            &[
                "consola.ttf",
                "cour.ttf",
                "DejaVuSansMono.ttf",
                "LiberationMono-Regular.ttf",
            ],
            &[
                "consolab.ttf",
                "courbd.ttf",
                "DejaVuSansMono-Bold.ttf",
                "LiberationMono-Bold.ttf",
            ],
        ),
        "arial" => extend_weight_candidates(
            &mut out,
            bold,
            &["arial.ttf", "Arial.ttf", "LiberationSans-Regular.ttf"],
            &["arialbd.ttf", "Arial Bold.ttf", "LiberationSans-Bold.ttf"],
        ),
        "times" => extend_weight_candidates(
            &mut out,
            bold,
            &["times.ttf", "Times New Roman.ttf", "LiberationSerif-Regular.ttf"],
            &["timesbd.ttf", "Times New Roman Bold.ttf", "LiberationSerif-Bold.ttf"],
        ),
        "courier" => extend_weight_candidates(
            &mut out,
            bold,
            &["cour.ttf", "Courier New.ttf", "LiberationMono-Regular.ttf"],
            &["courbd.ttf", "Courier New Bold.ttf", "LiberationMono-Bold.ttf"],
        ),
        "dejavu sans" => extend_weight_candidates(
            &mut out,
            bold,
            &["DejaVuSans.ttf"],
            &["DejaVuSans-Bold.ttf"],
        ),
        "noto sans" => extend_weight_candidates(
            &mut out,
            bold,
            &["NotoSans-Regular.ttf", "arial.ttf"],
            &["NotoSans-Bold.ttf", "arialbd.ttf"],
        ),
        "liberation sans" => extend_weight_candidates(
            &mut out,
            bold,
            &["LiberationSans-Regular.ttf", "arial.ttf"],
            &["LiberationSans-Bold.ttf", "arialbd.ttf"],
        ),
        "liberation serif" => extend_weight_candidates(
            &mut out,
            bold,
            &["LiberationSerif-Regular.ttf", "times.ttf"],
            &["LiberationSerif-Bold.ttf", "timesbd.ttf"],
        ),
        _ => {}
    }
    out
}

fn canonical_family_alias(family: &str) -> String {
    let family = normalize_family(family);
    let compact: String = family
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect();
    match compact.as_str() {
        "helvetica" | "helveticaneue" | "arial" | "arialmt" => "arial".to_string(),
        "times" | "timesroman" | "timesnewroman" => "times".to_string(),
        "courier" | "couriernew" => "courier".to_string(),
        "sansserif" => "sans-serif".to_string(),
        "systemui" => "system-ui".to_string(),
        "uisansserif" => "ui-sans-serif".to_string(),
        "uiserif" => "ui-serif".to_string(),
        "uimonospace" => "ui-monospace".to_string(),
        _ => family,
    }
}

fn extend_weight_candidates(out: &mut Vec<String>, bold: bool, regular: &[&str], heavy: &[&str]) {
    let groups: [&[&str]; 2] = if bold {
        [heavy, regular]
    } else {
        [regular, heavy]
    };
    for group in groups {
        for candidate in group {
            if !out.iter().any(|existing| existing.eq_ignore_ascii_case(candidate)) {
                out.push((*candidate).to_string());
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn host_font_pair() -> Option<(Vec<u8>, Option<Vec<u8>>)> {
    const PAIRS: [(&str, &str); 3] = [
        ("DejaVuSans.ttf", "DejaVuSans-Bold.ttf"),
        ("LiberationSans-Regular.ttf", "LiberationSans-Bold.ttf"),
        ("arial.ttf", "arialbd.ttf"),
    ];
    for dir in system_font_dirs() {
        for (regular, bold) in PAIRS {
            if let Some(data) = find_font_file(&dir, regular, 3) {
                return Some((data, find_font_file(&dir, bold, 3)));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn font_spec_rejects_bad_sizes_and_weights() {
        assert!(FontSpec::parse("serif", "400", f32::NAN).is_err());
        assert!(FontSpec::parse("serif", "400", -1.0).is_err());
        assert!(FontSpec::parse("serif", "extra", 12.0).is_err());
        let spec = FontSpec::parse("Arial, sans-serif", "bold", 12.0).unwrap();
        assert_eq!(spec.families, vec!["Arial", "sans-serif", "serif"]);
        assert!(spec.weight.is_bold());
    }

    #[test]
    fn registry_without_system_fonts_resolves_to_notdef() {
        let mut registry = FontRegistry::new();
        registry.set_system_fonts(false);
        let spec = FontSpec::parse("serif", "400", 20.0).unwrap();
        assert!(matches!(registry.resolve(&spec), Typeface::Notdef));
    }

    #[test]
    fn registering_invalid_bytes_fails() {
        let mut registry = FontRegistry::new();
        let err = registry
            .register_bytes(b"definitely not a font".to_vec(), Some("broken.ttf"))
            .unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidConfiguration(_)));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn registering_non_font_extension_fails() {
        let mut registry = FontRegistry::new();
        assert!(registry.register_file("fonts/readme.txt").is_err());
    }

    #[test]
    fn notdef_metrics_scale_with_size() {
        let shaped = Typeface::Notdef.shape("DRAFT", 10.0).unwrap();
        assert!((shaped.metrics.width - 30.0).abs() < 1e-4);
        assert!((shaped.metrics.ascent - 8.0).abs() < 1e-4);
        assert!((shaped.metrics.descent - 2.0).abs() < 1e-4);
        assert!((shaped.metrics.height() - 10.0).abs() < 1e-4);
        let bounds = shaped.path.unwrap().bounds();
        assert!(bounds.top() < 0.0 && bounds.bottom() <= 0.0);
        assert!(bounds.left() >= 0.0 && bounds.right() <= 30.0);
    }

    #[test]
    fn notdef_empty_and_whitespace_have_no_path() {
        let empty = Typeface::Notdef.shape("", 10.0).unwrap();
        assert_eq!(empty.metrics.width, 0.0);
        assert!(empty.path.is_none());
        let spaces = Typeface::Notdef.shape("  ", 10.0).unwrap();
        assert!((spaces.metrics.width - 12.0).abs() < 1e-4);
        assert!(spaces.path.is_none());
    }

    #[test]
    fn system_candidates_prefer_requested_weight() {
        let regular = system_font_file_candidates("helvetica", false);
        assert_eq!(regular[0], "arial.ttf");
        let bold = system_font_file_candidates("Helvetica Neue", true);
        assert_eq!(bold[0], "arialbd.ttf");
        assert!(bold.iter().any(|v| v == "arial.ttf"));
    }

    #[test]
    fn generic_families_have_candidates() {
        for family in ["serif", "sans-serif", "monospace", "system-ui"] {
            assert!(!system_font_file_candidates(family, false).is_empty(), "{family}");
        }
        assert!(system_font_file_candidates("some private face", false).is_empty());
    }

    #[test]
    fn direction_detects_hebrew_and_arabic() {
        assert_eq!(detect_direction("שלום"), HbDirection::RightToLeft);
        assert_eq!(detect_direction("مرحبا"), HbDirection::RightToLeft);
        assert_eq!(detect_direction("DRAFT"), HbDirection::LeftToRight);
    }

    #[test]
    fn registered_host_font_resolves_by_family_name() {
        let Some((regular, _)) = host_font_pair() else {
            eprintln!("no host font installed; skipping");
            return;
        };
        let mut registry = FontRegistry::new();
        registry.set_system_fonts(false);
        let name = registry.register_bytes(regular.clone(), Some("host.ttf")).unwrap();
        assert_eq!(registry.len(), 1);

        let spec = FontSpec::parse(&format!("'{name}', serif"), "400", 40.0).unwrap();
        match registry.resolve(&spec) {
            Typeface::Outline { name: resolved, data } => {
                assert_eq!(resolved, name);
                assert_eq!(data.as_slice(), regular.as_slice());
            }
            Typeface::Notdef => panic!("registered font {name} not resolved"),
        }
    }

    #[test]
    fn outline_shaping_puts_ink_above_baseline() {
        let Some((regular, _)) = host_font_pair() else {
            eprintln!("no host font installed; skipping");
            return;
        };
        let face = Typeface::Outline {
            name: "host".to_string(),
            data: Arc::new(regular),
        };
        let shaped = face.shape("DRAFT", 40.0).unwrap();
        let metrics = shaped.metrics;
        assert!(metrics.width > 40.0, "{metrics:?}");
        assert!(metrics.ascent > 20.0 && metrics.ascent < 60.0, "{metrics:?}");
        assert!(metrics.descent > 0.0 && metrics.descent < 40.0, "{metrics:?}");

        // Capitals sit on the baseline and rise toward negative y.
        let bounds = shaped.path.unwrap().bounds();
        assert!(bounds.top() < -20.0, "{bounds:?}");
        assert!(bounds.bottom() <= 2.0, "{bounds:?}");
        assert!(bounds.left() >= -2.0 && bounds.right() <= metrics.width + 2.0, "{bounds:?}");

        let again = face.shape("DRAFT", 40.0).unwrap();
        assert_eq!(again.metrics, metrics);
        assert_eq!(again.path.unwrap().bounds(), bounds);

        let blank = face.shape("", 40.0).unwrap();
        assert_eq!(blank.metrics.width, 0.0);
        assert!(blank.path.is_none());
    }

    #[test]
    fn registered_weights_pick_matching_face() {
        let Some((regular, Some(bold))) = host_font_pair() else {
            eprintln!("no regular/bold host font pair installed; skipping");
            return;
        };
        let mut registry = FontRegistry::new();
        registry.set_system_fonts(false);
        let family = registry.register_bytes(regular.clone(), Some("regular.ttf")).unwrap();
        let bold_family = registry.register_bytes(bold.clone(), Some("bold.ttf")).unwrap();
        assert_eq!(family, bold_family);

        let data_for = |weight: &str| match registry.resolve(&FontSpec::parse(&family, weight, 20.0).unwrap()) {
            Typeface::Outline { data, .. } => data,
            Typeface::Notdef => panic!("{family} at {weight} not resolved"),
        };
        assert_eq!(data_for("400").as_slice(), regular.as_slice());
        assert_eq!(data_for("bold").as_slice(), bold.as_slice());
        assert_eq!(data_for("700").as_slice(), bold.as_slice());
    }
}
