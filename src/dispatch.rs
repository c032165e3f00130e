use crate::debug::TraceLog;
use crate::encode::OutputFormat;
use crate::error::WatermarkError;
use crate::font::FontRegistry;
use crate::metrics::EncodeMetrics;
use crate::types::RenderingParameters;
use crate::worker::{DrawRequest, WorkerFault, WorkerRequest, WorkerResponse, handle, panic_message};
use serde_json::json;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Instant;

/// A place a draw request can run.
///
/// `submit` hands back the receiving end of the request's own response
/// channel: `then` or `catch`, then `finally`. A strategy that cannot accept
/// the request at all returns an error instead.
pub trait RenderStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn submit(&self, request: DrawRequest) -> Result<Receiver<WorkerResponse>, WatermarkError>;
}

/// Runs requests on the calling thread.
pub struct InlineStrategy {
    fonts: Arc<FontRegistry>,
}

impl InlineStrategy {
    pub fn new(fonts: Arc<FontRegistry>) -> Self {
        Self { fonts }
    }
}

impl RenderStrategy for InlineStrategy {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn submit(&self, request: DrawRequest) -> Result<Receiver<WorkerResponse>, WatermarkError> {
        let (tx, rx) = mpsc::channel();
        handle(WorkerRequest::Draw(request), &self.fonts, |response| {
            let _ = tx.send(response);
        });
        Ok(rx)
    }
}

/// Runs requests on a dedicated rayon pool.
pub struct OffThreadStrategy {
    pool: rayon::ThreadPool,
    fonts: Arc<FontRegistry>,
}

impl OffThreadStrategy {
    pub fn new(fonts: Arc<FontRegistry>, threads: usize) -> Result<Self, WatermarkError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("tilemark-render-{index}"))
            .panic_handler(|payload| {
                tracing::error!(panic = %panic_message(payload.as_ref()), "render worker panicked");
            })
            .build()
            .map_err(|e| {
                WatermarkError::CapabilityMissing(format!("cannot start render workers: {e}"))
            })?;
        Ok(Self { pool, fonts })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl RenderStrategy for OffThreadStrategy {
    fn name(&self) -> &'static str {
        "background"
    }

    fn submit(&self, request: DrawRequest) -> Result<Receiver<WorkerResponse>, WatermarkError> {
        let (tx, rx) = mpsc::channel();
        let fonts = Arc::clone(&self.fonts);
        self.pool.spawn(move || {
            handle(WorkerRequest::Draw(request), &fonts, |response| {
                let _ = tx.send(response);
            });
        });
        Ok(rx)
    }
}

/// Sends each encode request to the background strategy when one is
/// available and falls back to a single inline render when it fails.
pub struct Dispatcher {
    background: Option<Box<dyn RenderStrategy>>,
    inline: Arc<InlineStrategy>,
    fonts: Arc<FontRegistry>,
    trace: Option<TraceLog>,
}

impl Dispatcher {
    /// Probes for a background pool when `off_thread` is set; a pool that
    /// cannot start leaves the dispatcher inline-only.
    pub fn new(
        fonts: Arc<FontRegistry>,
        off_thread: bool,
        worker_threads: usize,
        trace: Option<TraceLog>,
    ) -> Self {
        let background: Option<Box<dyn RenderStrategy>> = if off_thread {
            match OffThreadStrategy::new(Arc::clone(&fonts), worker_threads) {
                Ok(strategy) => {
                    tracing::debug!(threads = strategy.threads(), "background rendering enabled");
                    Some(Box::new(strategy))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "background rendering unavailable, using inline");
                    None
                }
            }
        } else {
            None
        };
        Self::with_strategies(fonts, background, trace)
    }

    pub fn inline_only(fonts: Arc<FontRegistry>) -> Self {
        Self::with_strategies(fonts, None, None)
    }

    fn with_strategies(
        fonts: Arc<FontRegistry>,
        background: Option<Box<dyn RenderStrategy>>,
        trace: Option<TraceLog>,
    ) -> Self {
        Self {
            background,
            inline: Arc::new(InlineStrategy::new(Arc::clone(&fonts))),
            fonts,
            trace,
        }
    }

    /// Replaces the background strategy.
    pub fn with_background_strategy(mut self, strategy: Box<dyn RenderStrategy>) -> Self {
        self.background = Some(strategy);
        self
    }

    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }

    pub fn fonts(&self) -> &Arc<FontRegistry> {
        &self.fonts
    }

    pub fn trace(&self) -> Option<&TraceLog> {
        self.trace.as_ref()
    }

    /// Renders and encodes `params`, blocking until the data URL is ready.
    pub fn encode(
        &self,
        params: &RenderingParameters,
        format: OutputFormat,
    ) -> Result<String, WatermarkError> {
        self.submit(params, format).wait()
    }

    /// Starts a request without waiting for it.
    pub fn submit(&self, params: &RenderingParameters, format: OutputFormat) -> PendingRender {
        let request = DrawRequest::new(params.clone(), format);
        let mut pending = PendingRender {
            request: request.clone(),
            inline: Arc::clone(&self.inline),
            trace: self.trace.clone(),
            started: Instant::now(),
            strategy: "inline",
            can_fall_back: self.background.is_some(),
            responses: None,
            data_url: None,
            fault: None,
            settled: false,
        };

        let strategy: &dyn RenderStrategy = match &self.background {
            Some(background) => background.as_ref(),
            None => self.inline.as_ref(),
        };
        pending.strategy = strategy.name();
        if let Some(trace) = &self.trace {
            trace.event("dispatch.submit", json!({"strategy": strategy.name()}));
            trace.increment("dispatch.submitted", 1);
        }
        tracing::debug!(strategy = strategy.name(), "dispatching draw request");
        match strategy.submit(request) {
            Ok(rx) => pending.responses = Some(rx),
            Err(err) => {
                pending.fault = Some(WorkerFault::from(&err));
                pending.settled = true;
            }
        }
        pending
    }
}

/// An encode request in flight. Owns its response channel, so concurrent
/// requests never see each other's answers.
pub struct PendingRender {
    request: DrawRequest,
    inline: Arc<InlineStrategy>,
    trace: Option<TraceLog>,
    started: Instant,
    strategy: &'static str,
    can_fall_back: bool,
    responses: Option<Receiver<WorkerResponse>>,
    data_url: Option<String>,
    fault: Option<WorkerFault>,
    settled: bool,
}

impl PendingRender {
    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    /// Drains whatever responses have arrived. Returns `true` once the
    /// strategy has finished, after which `wait` does not block on it.
    pub fn poll(&mut self) -> bool {
        while !self.settled {
            let Some(rx) = &self.responses else {
                self.settled = true;
                break;
            };
            match rx.try_recv() {
                Ok(response) => self.record(response),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => self.settled = true,
            }
        }
        true
    }

    pub fn wait(self) -> Result<String, WatermarkError> {
        self.wait_with_metrics().map(|(url, _)| url)
    }

    pub fn wait_with_metrics(mut self) -> Result<(String, EncodeMetrics), WatermarkError> {
        while !self.settled {
            let Some(rx) = &self.responses else {
                break;
            };
            match rx.recv() {
                Ok(response) => self.record(response),
                Err(_) => break,
            }
        }
        self.settled = true;
        self.responses = None;

        let mut fell_back = false;
        let result = match self.data_url.take() {
            Some(url) => Ok(url),
            None if !self.can_fall_back => Err(self
                .fault
                .take()
                .map(WatermarkError::from)
                .unwrap_or_else(|| {
                    WatermarkError::CapabilityMissing("inline render produced no output".into())
                })),
            None => {
                fell_back = true;
                self.fall_back()
            }
        };

        let url = result?;
        let metrics = EncodeMetrics {
            strategy: if fell_back { "inline" } else { self.strategy },
            fell_back,
            encode_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            bytes: url.len(),
        };
        if let Some(trace) = &self.trace {
            trace.event(
                "dispatch.settled",
                json!({
                    "strategy": metrics.strategy,
                    "fell_back": metrics.fell_back,
                    "ms": metrics.encode_ms,
                    "bytes": metrics.bytes,
                }),
            );
            trace.increment("dispatch.settled", 1);
        }
        Ok((url, metrics))
    }

    fn record(&mut self, response: WorkerResponse) {
        match response {
            WorkerResponse::Then(url) => self.data_url = Some(url),
            WorkerResponse::Catch(fault) => self.fault = Some(fault),
            WorkerResponse::Finally => self.settled = true,
        }
    }

    fn fall_back(&mut self) -> Result<String, WatermarkError> {
        let reason = match &self.fault {
            Some(fault) => format!("{}: {}", fault.kind, fault.message),
            None => "background worker disconnected".to_string(),
        };
        tracing::warn!(strategy = self.strategy, reason = %reason, "background render failed, rendering inline");
        if let Some(trace) = &self.trace {
            trace.event(
                "dispatch.fallback",
                json!({"strategy": self.strategy, "reason": reason}),
            );
            trace.increment("dispatch.fallback", 1);
        }

        let rx = self.inline.submit(self.request.clone())?;
        let mut data_url = None;
        let mut fault = None;
        for response in rx.try_iter() {
            match response {
                WorkerResponse::Then(url) => data_url = Some(url),
                WorkerResponse::Catch(f) => fault = Some(f),
                WorkerResponse::Finally => break,
            }
        }
        match (data_url, fault) {
            (Some(url), _) => Ok(url),
            (None, Some(fault)) => Err(fault.into()),
            (None, None) => Err(WatermarkError::CapabilityMissing(
                "inline render produced no output".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::tests::SharedBuf;
    use crate::types::PaperSize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notdef_fonts() -> Arc<FontRegistry> {
        let mut fonts = FontRegistry::new();
        fonts.set_system_fonts(false);
        Arc::new(fonts)
    }

    fn small_params(text: &str) -> RenderingParameters {
        RenderingParameters {
            paper_size: PaperSize::B5,
            resolution_ppi: 30.0,
            color: "rgba(10, 20, 200, 0.6)".into(),
            ..RenderingParameters::new(text)
        }
    }

    /// Always answers `catch`.
    struct CatchingStrategy(AtomicUsize);

    impl RenderStrategy for CatchingStrategy {
        fn name(&self) -> &'static str {
            "catching"
        }

        fn submit(&self, _: DrawRequest) -> Result<Receiver<WorkerResponse>, WatermarkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel();
            tx.send(WorkerResponse::Catch(WorkerFault::new("capability", "no canvas")))
                .unwrap();
            tx.send(WorkerResponse::Finally).unwrap();
            Ok(rx)
        }
    }

    /// Drops the request without answering.
    struct VanishingStrategy;

    impl RenderStrategy for VanishingStrategy {
        fn name(&self) -> &'static str {
            "vanishing"
        }

        fn submit(&self, _: DrawRequest) -> Result<Receiver<WorkerResponse>, WatermarkError> {
            let (_tx, rx) = mpsc::channel();
            Ok(rx)
        }
    }

    /// Cannot even accept the request.
    struct RefusingStrategy;

    impl RenderStrategy for RefusingStrategy {
        fn name(&self) -> &'static str {
            "refusing"
        }

        fn submit(&self, _: DrawRequest) -> Result<Receiver<WorkerResponse>, WatermarkError> {
            Err(WatermarkError::CapabilityMissing("no worker context".into()))
        }
    }

    #[test]
    fn background_and_inline_produce_identical_output() {
        let fonts = notdef_fonts();
        let params = small_params("COPY");
        let inline = Dispatcher::inline_only(Arc::clone(&fonts))
            .encode(&params, OutputFormat::png())
            .unwrap();
        let background = Dispatcher::new(fonts, true, 2, None);
        assert!(background.has_background());
        let pending = background.submit(&params, OutputFormat::png());
        assert_eq!(pending.strategy(), "background");
        let (url, metrics) = pending.wait_with_metrics().unwrap();
        assert_eq!(url, inline);
        assert!(!metrics.fell_back);
        assert_eq!(metrics.bytes, url.len());
    }

    #[test]
    fn catch_falls_back_to_inline_once() {
        let fonts = notdef_fonts();
        let params = small_params("SECRET");
        let expected = Dispatcher::inline_only(Arc::clone(&fonts))
            .encode(&params, OutputFormat::png())
            .unwrap();

        let strategy = Arc::new(CatchingStrategy(AtomicUsize::new(0)));
        struct Shared(Arc<CatchingStrategy>);
        impl RenderStrategy for Shared {
            fn name(&self) -> &'static str {
                self.0.name()
            }
            fn submit(&self, r: DrawRequest) -> Result<Receiver<WorkerResponse>, WatermarkError> {
                self.0.submit(r)
            }
        }

        let buf = SharedBuf::default();
        let dispatcher = Dispatcher::new(fonts, false, 1, Some(TraceLog::from_writer(buf.clone())))
            .with_background_strategy(Box::new(Shared(Arc::clone(&strategy))));
        let (url, metrics) = dispatcher
            .submit(&params, OutputFormat::png())
            .wait_with_metrics()
            .unwrap();
        assert_eq!(url, expected);
        assert!(metrics.fell_back);
        assert_eq!(metrics.strategy, "inline");
        assert_eq!(strategy.0.load(Ordering::SeqCst), 1);

        let events = buf.lines();
        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["dispatch.submit", "dispatch.fallback", "dispatch.settled"]);
        assert_eq!(events[1]["reason"], "capability: no canvas");
    }

    #[test]
    fn vanished_or_refusing_workers_fall_back() {
        let fonts = notdef_fonts();
        let params = small_params("DRAFT");
        let expected = Dispatcher::inline_only(Arc::clone(&fonts))
            .encode(&params, OutputFormat::png())
            .unwrap();
        for strategy in [
            Box::new(VanishingStrategy) as Box<dyn RenderStrategy>,
            Box::new(RefusingStrategy),
        ] {
            let dispatcher =
                Dispatcher::inline_only(Arc::clone(&fonts)).with_background_strategy(strategy);
            assert_eq!(dispatcher.encode(&params, OutputFormat::png()).unwrap(), expected);
        }
    }

    #[test]
    fn inline_errors_are_terminal() {
        let mut params = small_params("DRAFT");
        params.font_weight = "extra heavy".into();
        let err = Dispatcher::inline_only(notdef_fonts())
            .encode(&params, OutputFormat::png())
            .unwrap_err();
        assert!(matches!(err, WatermarkError::Drawing(_)), "{err}");
    }

    #[test]
    fn drawing_errors_survive_the_fallback() {
        let mut params = small_params("DRAFT");
        params.color = "plaid".into();
        let dispatcher = Dispatcher::new(notdef_fonts(), true, 1, None);
        let err = dispatcher.encode(&params, OutputFormat::png()).unwrap_err();
        assert!(matches!(err, WatermarkError::Drawing(_)), "{err}");
    }

    #[test]
    fn concurrent_requests_keep_their_own_answers() {
        let fonts = notdef_fonts();
        let dispatcher = Dispatcher::new(Arc::clone(&fonts), true, 3, None);
        let texts = ["A", "BB", "CCC", "DDDD", "EEEEE", "FFFFFF"];
        let pending: Vec<_> = texts
            .iter()
            .map(|t| dispatcher.submit(&small_params(t), OutputFormat::png()))
            .collect();
        let reference = Dispatcher::inline_only(fonts);
        for (text, pending) in texts.iter().zip(pending) {
            let expected = reference.encode(&small_params(text), OutputFormat::png()).unwrap();
            assert_eq!(pending.wait().unwrap(), expected, "{text}");
        }
    }

    #[test]
    fn poll_reports_completion() {
        let dispatcher = Dispatcher::new(notdef_fonts(), true, 1, None);
        let mut pending = dispatcher.submit(&small_params("X"), OutputFormat::jpeg(0.7));
        while !pending.poll() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let url = pending.wait().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }
}
