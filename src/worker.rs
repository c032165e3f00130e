//! Message contract between a caller and a background renderer.
//!
//! One `draw` request produces either `then` (a data URL) or `catch` (an error
//! detail), always followed by `finally`. The same contract runs in-process on
//! a thread pool and out-of-process over JSON lines (`tilemark worker`).

use crate::encode::{OutputFormat, encode_data_url};
use crate::error::WatermarkError;
use crate::font::FontRegistry;
use crate::raster::render;
use crate::types::RenderingParameters;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WorkerRequest {
    Draw(DrawRequest),
}

/// Rendering parameters plus the requested output encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRequest {
    #[serde(flatten)]
    pub params: RenderingParameters,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
}

impl DrawRequest {
    pub fn new(params: RenderingParameters, format: OutputFormat) -> Self {
        Self {
            params,
            mime: Some(format.mime().to_string()),
            quality: Some(format.quality),
        }
    }

    pub fn format(&self) -> OutputFormat {
        OutputFormat::from_mime(self.mime.as_deref(), self.quality)
    }

    /// Renders onto a fresh surface and encodes it.
    pub fn run(&self, fonts: &FontRegistry) -> Result<String, WatermarkError> {
        let surface = render(None, &self.params, fonts)?;
        encode_data_url(&surface, self.format())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WorkerResponse {
    Then(String),
    Catch(WorkerFault),
    Finally,
}

/// Error detail carried by a `catch` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFault {
    pub kind: String,
    pub message: String,
}

impl WorkerFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&WatermarkError> for WorkerFault {
    fn from(err: &WatermarkError) -> Self {
        let message = match err {
            WatermarkError::CapabilityMissing(m)
            | WatermarkError::Drawing(m)
            | WatermarkError::Encoding(m)
            | WatermarkError::InvalidConfiguration(m) => m.clone(),
            WatermarkError::Io(e) => e.to_string(),
        };
        WorkerFault::new(err.kind(), message)
    }
}

impl From<WorkerFault> for WatermarkError {
    fn from(fault: WorkerFault) -> Self {
        match fault.kind.as_str() {
            "capability" => WatermarkError::CapabilityMissing(fault.message),
            "drawing" => WatermarkError::Drawing(fault.message),
            "encoding" => WatermarkError::Encoding(fault.message),
            "configuration" => WatermarkError::InvalidConfiguration(fault.message),
            "io" => WatermarkError::Io(io::Error::other(fault.message)),
            other => WatermarkError::CapabilityMissing(format!(
                "background worker failed ({other}): {}",
                fault.message
            )),
        }
    }
}

/// Serves one request. `post` sees `then` or `catch`, then `finally`, even
/// when rendering panics.
pub fn handle(request: WorkerRequest, fonts: &FontRegistry, mut post: impl FnMut(WorkerResponse)) {
    match request {
        WorkerRequest::Draw(draw) => {
            let outcome = catch_unwind(AssertUnwindSafe(|| draw.run(fonts)));
            match outcome {
                Ok(Ok(url)) => post(WorkerResponse::Then(url)),
                Ok(Err(err)) => post(WorkerResponse::Catch(WorkerFault::from(&err))),
                Err(payload) => post(WorkerResponse::Catch(WorkerFault::new(
                    "panic",
                    panic_message(payload.as_ref()),
                ))),
            }
        }
    }
    post(WorkerResponse::Finally);
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "render panicked".to_string()
    }
}

/// JSON-lines worker loop: one request per input line, its responses written
/// as one line each. Malformed lines get a `protocol` fault.
pub fn serve_lines(
    input: impl BufRead,
    mut output: impl Write,
    fonts: &FontRegistry,
) -> io::Result<usize> {
    let mut served = 0usize;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut responses = Vec::with_capacity(2);
        match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => handle(request, fonts, |response| responses.push(response)),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed worker request");
                responses.push(WorkerResponse::Catch(WorkerFault::new(
                    "protocol",
                    err.to_string(),
                )));
                responses.push(WorkerResponse::Finally);
            }
        }
        for response in responses {
            let json = serde_json::to_string(&response).map_err(io::Error::other)?;
            writeln!(output, "{json}")?;
        }
        output.flush()?;
        served += 1;
    }
    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaperSize;
    use serde_json::{Value, json};

    fn notdef_fonts() -> FontRegistry {
        let mut fonts = FontRegistry::new();
        fonts.set_system_fonts(false);
        fonts
    }

    fn tiny_params() -> RenderingParameters {
        RenderingParameters {
            paper_size: PaperSize::A5,
            resolution_ppi: 20.0,
            ..RenderingParameters::new("DRAFT")
        }
    }

    #[test]
    fn draw_request_uses_flat_wire_shape() {
        let request = WorkerRequest::Draw(DrawRequest::new(
            tiny_params(),
            OutputFormat::from_mime(Some("image/jpeg"), Some(0.5)),
        ));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "draw");
        assert_eq!(value["data"]["type"], "image/jpeg");
        assert_eq!(value["data"]["quality"], 0.5);
        assert_eq!(value["data"]["paperSize"], "A5");
        assert_eq!(value["data"]["text"], "DRAFT");
        assert!(value["data"].get("backgroundImage").is_none());
        let back: WorkerRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn missing_type_and_quality_default_to_png() {
        let mut data = serde_json::to_value(tiny_params()).unwrap();
        data["text"] = json!("hello");
        let request: WorkerRequest =
            serde_json::from_value(json!({"type": "draw", "data": data})).unwrap();
        let WorkerRequest::Draw(draw) = request;
        assert_eq!(draw.mime, None);
        assert_eq!(draw.format(), OutputFormat::png());
    }

    #[test]
    fn responses_use_tagged_messages() {
        assert_eq!(
            serde_json::to_value(WorkerResponse::Then("data:x".into())).unwrap(),
            json!({"type": "then", "data": "data:x"})
        );
        assert_eq!(
            serde_json::to_value(WorkerResponse::Finally).unwrap(),
            json!({"type": "finally"})
        );
        let catch = WorkerResponse::Catch(WorkerFault::new("drawing", "bad color"));
        assert_eq!(
            serde_json::to_value(catch).unwrap(),
            json!({"type": "catch", "data": {"kind": "drawing", "message": "bad color"}})
        );
    }

    #[test]
    fn handle_posts_then_before_finally() {
        let mut seen = Vec::new();
        let request = WorkerRequest::Draw(DrawRequest::new(tiny_params(), OutputFormat::png()));
        handle(request, &notdef_fonts(), |r| seen.push(r));
        assert_eq!(seen.len(), 2);
        match &seen[0] {
            WorkerResponse::Then(url) => assert!(url.starts_with("data:image/png;base64,")),
            other => panic!("expected then, got {other:?}"),
        }
        assert_eq!(seen[1], WorkerResponse::Finally);
    }

    #[test]
    fn handle_reports_failures_as_catch() {
        let mut params = tiny_params();
        params.color = "definitely not a color".into();
        let mut seen = Vec::new();
        handle(
            WorkerRequest::Draw(DrawRequest::new(params, OutputFormat::png())),
            &notdef_fonts(),
            |r| seen.push(r),
        );
        match &seen[..] {
            [WorkerResponse::Catch(fault), WorkerResponse::Finally] => {
                assert_eq!(fault.kind, "drawing");
                let err: WatermarkError = fault.clone().into();
                assert!(matches!(err, WatermarkError::Drawing(_)));
            }
            other => panic!("unexpected responses {other:?}"),
        }
    }

    #[test]
    fn unknown_fault_kinds_become_capability_errors() {
        let err: WatermarkError = WorkerFault::new("panic", "boom").into();
        assert!(matches!(err, WatermarkError::CapabilityMissing(m) if m.contains("boom")));
    }

    #[test]
    fn serve_lines_answers_each_request() {
        let good = serde_json::to_string(&WorkerRequest::Draw(DrawRequest::new(
            tiny_params(),
            OutputFormat::png(),
        )))
        .unwrap();
        let input = format!("{good}\n\nnot json\n");
        let mut out = Vec::new();
        let served = serve_lines(input.as_bytes(), &mut out, &notdef_fonts()).unwrap();
        assert_eq!(served, 2);
        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let kinds: Vec<&str> = lines.iter().map(|l| l["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["then", "finally", "catch", "finally"]);
        assert_eq!(lines[2]["data"]["kind"], "protocol");
    }
}
