use crate::dispatch::Dispatcher;
use crate::encode::OutputFormat;
use crate::error::WatermarkError;
use crate::types::RenderingParameters;
use serde_json::json;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Resolution of on-screen previews.
pub const PREVIEW_PPI: f32 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewFrame {
    pub generation: u64,
    pub params: RenderingParameters,
    pub data_url: String,
}

#[derive(Debug)]
pub enum PreviewEvent {
    Frame(PreviewFrame),
    Failed {
        generation: u64,
        error: WatermarkError,
    },
}

#[derive(Default)]
struct PreviewState {
    requested: Option<RenderingParameters>,
    generation: u64,
    applied: Option<RenderingParameters>,
    rendering: bool,
    shutdown: bool,
    frames: u64,
    latest: Option<PreviewFrame>,
}

impl PreviewState {
    fn is_dirty(&self) -> bool {
        self.requested.is_some() && self.requested != self.applied
    }
}

struct Shared {
    state: Mutex<PreviewState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PreviewState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a low-resolution preview in step with edited parameters.
///
/// At most one render is in flight. Updates that arrive meanwhile only
/// replace the requested snapshot; when the render finishes the loop starts
/// again if that snapshot differs from the one just drawn, so intermediate
/// edits are skipped.
pub struct PreviewLoop {
    shared: Arc<Shared>,
    ppi: f32,
    driver: Option<JoinHandle<()>>,
}

impl PreviewLoop {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sink: impl FnMut(PreviewEvent) + Send + 'static,
    ) -> Result<Self, WatermarkError> {
        Self::with_resolution(dispatcher, PREVIEW_PPI, sink)
    }

    pub fn with_resolution(
        dispatcher: Arc<Dispatcher>,
        ppi: f32,
        sink: impl FnMut(PreviewEvent) + Send + 'static,
    ) -> Result<Self, WatermarkError> {
        if !ppi.is_finite() || ppi <= 0.0 {
            return Err(WatermarkError::InvalidConfiguration(format!(
                "preview resolution must be positive, got {ppi}"
            )));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(PreviewState::default()),
            changed: Condvar::new(),
        });
        let driver_shared = Arc::clone(&shared);
        let driver = std::thread::Builder::new()
            .name("tilemark-preview".to_string())
            .spawn(move || drive(driver_shared, dispatcher, sink))?;
        Ok(Self {
            shared,
            ppi,
            driver: Some(driver),
        })
    }

    /// Records new parameters; the resolution is replaced by the preview's.
    pub fn update(&self, params: &RenderingParameters) {
        let mut state = self.shared.lock();
        state.requested = Some(params.at_resolution(self.ppi));
        state.generation += 1;
        self.shared.changed.notify_all();
    }

    /// Blocks until the last requested snapshot has been drawn.
    pub fn wait_idle(&self) {
        let mut state = self.shared.lock();
        while !state.shutdown && (state.rendering || state.is_dirty()) {
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn latest(&self) -> Option<PreviewFrame> {
        self.shared.lock().latest.clone()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.lock().frames
    }
}

impl Drop for PreviewLoop {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.changed.notify_all();
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

fn drive(
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher>,
    mut sink: impl FnMut(PreviewEvent),
) {
    loop {
        let (params, generation) = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if state.is_dirty() {
                    if let Some(requested) = state.requested.clone() {
                        state.rendering = true;
                        break (requested, state.generation);
                    }
                }
                state = shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let outcome = dispatcher.encode(&params, OutputFormat::png());
        let mut latest = None;
        let event = match outcome {
            Ok(data_url) => {
                let frame = PreviewFrame {
                    generation,
                    params: params.clone(),
                    data_url,
                };
                latest = Some(frame.clone());
                PreviewEvent::Frame(frame)
            }
            Err(error) => {
                tracing::warn!(generation, error = %error, "preview render failed");
                PreviewEvent::Failed { generation, error }
            }
        };
        if let Some(trace) = dispatcher.trace() {
            trace.event(
                "preview.settled",
                json!({"generation": generation, "ok": latest.is_some()}),
            );
        }
        sink(event);

        let mut state = shared.lock();
        state.applied = Some(params);
        state.rendering = false;
        if let Some(frame) = latest {
            state.frames += 1;
            state.latest = Some(frame);
        }
        shared.changed.notify_all();
    }
}
