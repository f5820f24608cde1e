use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use checkpoint_core::{Descriptor, DescriptorExtractor, ExtractError};
use checkpoint_hw::{CameraError, VideoSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("video source error: {0}")]
    Device(String),
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<CameraError> for EngineError {
    fn from(e: CameraError) -> Self {
        EngineError::Device(e.to_string())
    }
}

/// Result of one probe: grab the current frame, look for the best face.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub descriptor: Option<Descriptor>,
    pub frame_sequence: u32,
}

/// Messages sent from the detection loop to the engine thread.
pub(crate) enum EngineRequest {
    LoadModels {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Enroll {
        image: PathBuf,
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
    Probe {
        reply: oneshot::Sender<Result<ProbeResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    busy: Arc<AtomicBool>,
}

impl EngineHandle {
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self {
            tx,
            busy: Arc::default(),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// True while the engine thread is serving a request, including one
    /// whose caller has already given up on it.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Load the extraction models.
    pub async fn load_models(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::LoadModels { reply }).await
    }

    /// Extract the descriptor for a registry reference image.
    pub async fn enroll(&self, image: PathBuf) -> Result<Descriptor, EngineError> {
        self.request(|reply| EngineRequest::Enroll { image, reply }).await
    }

    /// Capture the current frame and extract the best face descriptor, if any.
    pub async fn probe(&self) -> Result<ProbeResult, EngineError> {
        self.request(|reply| EngineRequest::Probe { reply }).await
    }
}

/// Opens the video source. Called at startup and again on the first probe
/// after a device error.
pub type SourceOpener = Box<dyn FnMut() -> Result<Box<dyn VideoSource>, CameraError> + Send>;

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the video source and the extractor and serves one
/// request at a time, so extraction calls never overlap. Probes whose caller
/// stopped waiting are dropped unserved.
pub fn spawn_engine(
    mut open_source: SourceOpener,
    mut extractor: Box<dyn DescriptorExtractor>,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let busy = Arc::new(AtomicBool::new(false));
    let engine_busy = busy.clone();

    std::thread::Builder::new()
        .name("checkpoint-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut source = open(&mut open_source).ok();
            while let Some(req) = rx.blocking_recv() {
                engine_busy.store(true, Ordering::Release);
                match req {
                    EngineRequest::LoadModels { reply } => {
                        let result = extractor.load().map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { image, reply } => {
                        let result = extractor.enroll(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Probe { reply } if reply.is_closed() => {
                        tracing::debug!("probe abandoned before it ran; skipped");
                    }
                    EngineRequest::Probe { reply } => {
                        let result = run_probe(&mut source, &mut open_source, extractor.as_mut());
                        let _ = reply.send(result);
                    }
                }
                engine_busy.store(false, Ordering::Release);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, busy })
}

fn open(open_source: &mut SourceOpener) -> Result<Box<dyn VideoSource>, CameraError> {
    match open_source() {
        Ok(source) => {
            tracing::info!(source = %source.describe(), "video source ready");
            Ok(source)
        }
        Err(e) => {
            tracing::error!(error = %e, "video source unavailable");
            Err(e)
        }
    }
}

fn run_probe(
    source: &mut Option<Box<dyn VideoSource>>,
    open_source: &mut SourceOpener,
    extractor: &mut dyn DescriptorExtractor,
) -> Result<ProbeResult, EngineError> {
    let mut current = match source.take() {
        Some(current) => current,
        None => open(open_source)?,
    };
    // A source that fails to deliver is dropped and reopened on the next probe.
    let frame = current.current_frame()?;
    *source = Some(current);

    let descriptor = extractor.detect(&frame)?;
    tracing::debug!(
        seq = frame.sequence,
        face = descriptor.is_some(),
        latency_ms = frame.captured_at.elapsed().as_millis() as u64,
        "probe: frame processed"
    );

    Ok(ProbeResult {
        descriptor,
        frame_sequence: frame.sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_core::Frame;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StaticSource;

    impl VideoSource for StaticSource {
        fn current_frame(&mut self) -> Result<Frame, CameraError> {
            Ok(Frame::new(vec![0; 4], 2, 2, 9))
        }

        fn describe(&self) -> String {
            "static".into()
        }
    }

    struct FakeExtractor {
        loaded: bool,
    }

    impl DescriptorExtractor for FakeExtractor {
        fn load(&mut self) -> Result<(), ExtractError> {
            self.loaded = true;
            Ok(())
        }

        fn detect(&mut self, frame: &Frame) -> Result<Option<Descriptor>, ExtractError> {
            if !self.loaded {
                return Err(ExtractError::NotLoaded);
            }
            Ok(Some(Descriptor::new(vec![frame.sequence as f32])))
        }

        fn enroll(&mut self, reference_image: &Path) -> Result<Descriptor, ExtractError> {
            if reference_image.ends_with("blank.jpg") {
                return Err(ExtractError::NoFace(reference_image.display().to_string()));
            }
            Ok(Descriptor::new(vec![1.0]))
        }
    }

    fn extractor() -> Box<dyn DescriptorExtractor> {
        Box::new(FakeExtractor { loaded: false })
    }

    fn static_source() -> SourceOpener {
        Box::new(|| Ok(Box::new(StaticSource) as Box<dyn VideoSource>))
    }

    /// Fails the first `failures` opens with a permission error.
    fn flaky_source(failures: usize) -> (SourceOpener, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = opens.clone();
        let opener: SourceOpener = Box::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < failures {
                Err(CameraError::PermissionDenied("/dev/video0".into()))
            } else {
                Ok(Box::new(StaticSource) as Box<dyn VideoSource>)
            }
        });
        (opener, opens)
    }

    /// First `detect` blocks for `delay`; every call is counted.
    struct SlowExtractor {
        delay: Duration,
        detects: Arc<AtomicUsize>,
    }

    impl DescriptorExtractor for SlowExtractor {
        fn load(&mut self) -> Result<(), ExtractError> {
            Ok(())
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Option<Descriptor>, ExtractError> {
            if self.detects.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(self.delay);
            }
            Ok(None)
        }

        fn enroll(&mut self, _reference_image: &Path) -> Result<Descriptor, ExtractError> {
            Ok(Descriptor::new(vec![0.0]))
        }
    }

    #[tokio::test]
    async fn test_probe_after_load() {
        let engine = spawn_engine(static_source(), extractor()).unwrap();

        assert!(matches!(engine.probe().await, Err(EngineError::Extract(ExtractError::NotLoaded))));

        engine.load_models().await.unwrap();
        let probe = engine.probe().await.unwrap();
        assert_eq!(probe.frame_sequence, 9);
        assert_eq!(probe.descriptor.unwrap().values(), &[9.0]);
    }

    #[tokio::test]
    async fn test_enroll_failure_is_reported() {
        let engine = spawn_engine(static_source(), extractor()).unwrap();
        assert!(engine.enroll(PathBuf::from("/faces/alice.jpg")).await.is_ok());
        assert!(engine.enroll(PathBuf::from("/faces/blank.jpg")).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_source_reopened_on_next_probe() {
        // Startup open and the first probe's reopen both fail.
        let (opener, opens) = flaky_source(2);
        let engine = spawn_engine(opener, extractor()).unwrap();
        engine.load_models().await.unwrap();

        let err = engine.probe().await.unwrap_err();
        assert!(matches!(err, EngineError::Device(ref msg) if msg.contains("permission denied")));
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        let probe = engine.probe().await.unwrap();
        assert_eq!(probe.frame_sequence, 9);
        assert_eq!(opens.load(Ordering::SeqCst), 3);

        // Healthy source is kept, not reopened per probe.
        engine.probe().await.unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_abandoned_probe_is_not_run() {
        let detects = Arc::new(AtomicUsize::new(0));
        let slow = SlowExtractor {
            delay: Duration::from_millis(300),
            detects: detects.clone(),
        };
        let engine = spawn_engine(static_source(), Box::new(slow)).unwrap();
        let limit = Duration::from_millis(50);

        // First probe blocks the engine; the caller gives up on it.
        assert!(tokio::time::timeout(limit, engine.probe()).await.is_err());
        assert!(engine.is_busy());

        // Queued behind the slow one and abandoned too.
        assert!(tokio::time::timeout(limit, engine.probe()).await.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!engine.is_busy());
        assert_eq!(detects.load(Ordering::SeqCst), 1);

        engine.probe().await.unwrap();
        assert_eq!(detects.load(Ordering::SeqCst), 2);
    }
}
