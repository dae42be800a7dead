use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use image::RgbaImage;
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{EventKind, RecursiveMode, Watcher};
use phonescan_core::ScanConfig;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::extract::Extractor;
use crate::preprocess::{self, PreprocessError};
use crate::recognizer::{OcrBackend, OcrError, RecognizeOptions};
use crate::types::{ScanResult, ScanSource};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A scan is already in progress")]
    Busy,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
}

/// Single-slot guard; the flag clears when the guard drops, whatever path the
/// run took out.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates: normalize → recognize → extract, one run at a time.
pub struct ScanPipeline<R: OcrBackend + 'static> {
    recognizer: Arc<R>,
    config: ScanConfig,
    extractor: Extractor,
    in_flight: Arc<AtomicBool>,
}

impl<R: OcrBackend + 'static> ScanPipeline<R> {
    pub fn new(recognizer: R, config: ScanConfig) -> Self {
        let extractor = Extractor::new(config.extract.clone());
        Self {
            recognizer: Arc::new(recognizer),
            config,
            extractor,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// True while a run holds the pipeline.
    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Process an image file on disk.
    pub async fn process_file(
        &self,
        path: &Path,
        source: ScanSource,
    ) -> Result<ScanResult, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        self.process_bytes(&bytes, source).await
    }

    /// Process encoded image bytes (camera still or uploaded file).
    pub async fn process_bytes(
        &self,
        data: &[u8],
        source: ScanSource,
    ) -> Result<ScanResult, PipelineError> {
        let guard = InFlight::acquire(&self.in_flight).ok_or(PipelineError::Busy)?;
        let frame = image::load_from_memory(data)
            .map_err(PreprocessError::from)?
            .to_rgba8();
        self.run(guard, &frame, source).await
    }

    /// Process an already-decoded frame, e.g. straight off a camera.
    pub async fn process_frame(
        &self,
        frame: &RgbaImage,
        source: ScanSource,
    ) -> Result<ScanResult, PipelineError> {
        let guard = InFlight::acquire(&self.in_flight).ok_or(PipelineError::Busy)?;
        self.run(guard, frame, source).await
    }

    async fn run(
        &self,
        guard: InFlight,
        frame: &RgbaImage,
        source: ScanSource,
    ) -> Result<ScanResult, PipelineError> {
        let started = Instant::now();

        // 1. Normalize (synchronous).
        let png = preprocess::prepare_frame(
            frame,
            source,
            self.config.preprocess.max_upload_dimension,
        )?;
        tracing::debug!(%source, png_bytes = png.len(), "normalized frame");

        // 2. Recognize. The engine blocks, so it runs off the async workers.
        // The guard travels with the blocking task: if this future is dropped,
        // the pipeline stays busy until the engine has actually returned.
        let recognizer = Arc::clone(&self.recognizer);
        let options = RecognizeOptions::from(&self.config.recognizer);
        let (_guard, recognized) = tokio::task::spawn_blocking(move || {
            let text = recognizer.recognize(&png, &options);
            (guard, text)
        })
        .await
        .map_err(|e| OcrError::Engine(format!("recognition task failed: {e}")))?;
        let ocr_text = recognized?;
        tracing::debug!(chars = ocr_text.len(), "recognized text");

        // 3. Extract.
        let numbers = self.extractor.extract(&ocr_text);
        tracing::info!(
            %source,
            found = numbers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan complete"
        );

        Ok(ScanResult { source, ocr_text, numbers, scanned_at: Utc::now() })
    }
}

// ── Watch-folder intake ───────────────────────────────────────────────────────

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tif", "tiff"];

/// Whether `path` looks like an image the decoder can handle.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// How long a file must go without write events before it is treated as
/// complete, on platforms that do not report a writer closing the file.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    /// Created, renamed in, or written to; more bytes may follow.
    Touched,
    /// A writer closed the file.
    Finished,
}

fn write_state(kind: &EventKind) -> Option<WriteState> {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(WriteState::Finished),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Create(_) | EventKind::Modify(_) => Some(WriteState::Touched),
        _ => None,
    }
}

/// Paths that have seen write activity but are not known to be complete yet.
#[derive(Debug)]
struct PendingWrites {
    quiet: Duration,
    last_touched: HashMap<PathBuf, Instant>,
}

impl PendingWrites {
    fn new(quiet: Duration) -> Self {
        Self { quiet, last_touched: HashMap::new() }
    }

    fn touch(&mut self, path: PathBuf, now: Instant) {
        self.last_touched.insert(path, now);
    }

    fn finish(&mut self, path: &Path) {
        self.last_touched.remove(path);
    }

    /// Remove and return every path idle for at least `quiet`.
    fn settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let quiet = self.quiet;
        let mut ready: Vec<PathBuf> = self
            .last_touched
            .iter()
            .filter(|(_, at)| now.duration_since(**at) >= quiet)
            .map(|(path, _)| path.clone())
            .collect();
        ready.sort();
        for path in &ready {
            self.last_touched.remove(path);
        }
        ready
    }
}

/// Spawn a notify watcher on `watch_dir` that sends image paths to `tx` once
/// they have been completely written. Uses [`DEFAULT_SETTLE`].
/// Returns the watcher — it must be kept alive for watching to continue.
/// Must be called from within a Tokio runtime.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    spawn_intake_watcher_with(watch_dir, tx, DEFAULT_SETTLE)
}

/// Like [`spawn_intake_watcher`], with an explicit settle window.
///
/// A path is forwarded as soon as its writer closes it, or after `settle`
/// passes with no further events for it. Forwarding waits for room in `tx`,
/// so a slow consumer holds files back instead of losing them.
pub fn spawn_intake_watcher_with(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
    settle: Duration,
) -> notify::Result<impl notify::Watcher> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(ev) => {
                let Some(state) = write_state(&ev.kind) else { return };
                for path in ev.paths.into_iter().filter(|p| is_image_path(p)) {
                    // Closed only once the settle task has stopped.
                    let _ = events_tx.send((path, state));
                }
            }
            Err(e) => tracing::warn!("watch error: {e}"),
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    tokio::spawn(settle_writes(events_rx, tx, settle));
    Ok(watcher)
}

async fn settle_writes(
    mut events: mpsc::UnboundedReceiver<(PathBuf, WriteState)>,
    tx: mpsc::Sender<PathBuf>,
    settle: Duration,
) {
    let mut pending = PendingWrites::new(settle);
    let mut tick = tokio::time::interval((settle / 4).max(Duration::from_millis(10)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let ready = tokio::select! {
            event = events.recv() => match event {
                Some((path, WriteState::Touched)) => {
                    pending.touch(path, Instant::now());
                    continue;
                }
                Some((path, WriteState::Finished)) => {
                    pending.finish(&path);
                    vec![path]
                }
                // The watcher was dropped.
                None => return,
            },
            _ = tick.tick() => pending.settled(Instant::now()),
        };

        // Renamed away or deleted before it settled.
        for path in ready.into_iter().filter(|p| p.exists()) {
            tracing::debug!("intake ready: {}", path.display());
            if tx.send(path).await.is_err() {
                tracing::debug!("intake consumer gone, stopping");
                return;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::MockRecognizer;
    use image::{DynamicImage, ImageBuffer, Rgba};
    use std::io::Cursor;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn frame(width: u32, height: u32) -> RgbaImage {
        ImageBuffer::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255]))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(frame(width, height))
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Records the size of each image it is handed.
    struct SizeRecorder {
        text: String,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl OcrBackend for SizeRecorder {
        fn recognize(&self, image_bytes: &[u8], _options: &RecognizeOptions) -> Result<String, OcrError> {
            let img = image::load_from_memory(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            self.seen.lock().unwrap().push((img.width(), img.height()));
            Ok(self.text.clone())
        }
    }

    struct Failing;

    impl OcrBackend for Failing {
        fn recognize(&self, _image_bytes: &[u8], _options: &RecognizeOptions) -> Result<String, OcrError> {
            Err(OcrError::Engine("tessdata missing".into()))
        }
    }

    /// Blocks until the test releases it, to hold the pipeline busy.
    struct Gate(Mutex<std::sync::mpsc::Receiver<()>>);

    impl OcrBackend for Gate {
        fn recognize(&self, _image_bytes: &[u8], _options: &RecognizeOptions) -> Result<String, OcrError> {
            let _ = self.0.lock().unwrap().recv();
            Ok("555-123-4567".into())
        }
    }

    /// Gated like [`Gate`], and counts how many calls overlap.
    struct Overlap {
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Overlap {
        fn new(gate: std::sync::mpsc::Receiver<()>) -> Self {
            Self {
                gate: Mutex::new(gate),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl OcrBackend for Overlap {
        fn recognize(&self, _image_bytes: &[u8], _options: &RecognizeOptions) -> Result<String, OcrError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.lock().unwrap().recv();
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("555-123-4567".into())
        }
    }

    #[tokio::test]
    async fn process_bytes_extracts_numbers() {
        let pipeline = ScanPipeline::new(
            MockRecognizer::new("Call me: 555-123-4567\nOffice (212) 555 7890\nabc123"),
            ScanConfig::default(),
        );

        let result = pipeline.process_bytes(&png(40, 40), ScanSource::Capture).await.unwrap();

        let numbers: Vec<&str> = result.numbers.iter().map(|n| n.as_str()).collect();
        assert_eq!(numbers, ["555-123-4567", "(212) 555 7890"]);
        assert_eq!(result.source, ScanSource::Capture);
        assert!(!pipeline.is_processing());
    }

    #[tokio::test]
    async fn no_numbers_is_not_an_error() {
        let pipeline = ScanPipeline::new(MockRecognizer::new("hello world"), ScanConfig::default());
        let result = pipeline.process_frame(&frame(20, 20), ScanSource::Upload).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.ocr_text, "hello world");
    }

    #[tokio::test]
    async fn capture_crops_but_upload_keeps_full_frame() {
        let pipeline = ScanPipeline::new(
            SizeRecorder { text: String::new(), seen: Mutex::new(vec![]) },
            ScanConfig::default(),
        );
        let f = frame(100, 50);
        pipeline.process_frame(&f, ScanSource::Capture).await.unwrap();
        pipeline.process_frame(&f, ScanSource::Upload).await.unwrap();

        let seen = pipeline.recognizer.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(80, 15), (100, 50)]);
    }

    #[tokio::test]
    async fn upload_respects_configured_max_dimension() {
        let mut config = ScanConfig::default();
        config.preprocess.max_upload_dimension = 50;
        let pipeline = ScanPipeline::new(
            SizeRecorder { text: String::new(), seen: Mutex::new(vec![]) },
            config,
        );
        pipeline.process_frame(&frame(200, 100), ScanSource::Upload).await.unwrap();
        assert_eq!(pipeline.recognizer.seen.lock().unwrap()[0], (50, 25));
    }

    #[tokio::test]
    async fn recognition_failure_releases_guard() {
        let pipeline = ScanPipeline::new(Failing, ScanConfig::default());
        let err = pipeline.process_frame(&frame(20, 20), ScanSource::Capture).await.unwrap_err();
        assert!(matches!(err, PipelineError::Ocr(OcrError::Engine(_))));
        assert!(!pipeline.is_processing());
    }

    #[tokio::test]
    async fn invalid_region_releases_guard() {
        let pipeline = ScanPipeline::new(MockRecognizer::new("555-123-4567"), ScanConfig::default());
        let err = pipeline.process_frame(&frame(20, 2), ScanSource::Capture).await.unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(PreprocessError::InvalidRegion { .. })));
        assert!(!pipeline.is_processing());
    }

    #[tokio::test]
    async fn undecodable_bytes_release_guard() {
        let pipeline = ScanPipeline::new(MockRecognizer::new(""), ScanConfig::default());
        let err = pipeline.process_bytes(b"garbage", ScanSource::Upload).await.unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(PreprocessError::Load(_))));
        assert!(!pipeline.is_processing());
    }

    #[tokio::test]
    async fn second_request_while_busy_is_rejected() {
        let (release, gate) = std::sync::mpsc::channel();
        let pipeline = Arc::new(ScanPipeline::new(Gate(Mutex::new(gate)), ScanConfig::default()));

        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.process_frame(&frame(20, 20), ScanSource::Capture).await })
        };
        while !pipeline.is_processing() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = pipeline.process_frame(&frame(20, 20), ScanSource::Capture).await.unwrap_err();
        assert!(matches!(err, PipelineError::Busy));

        release.send(()).unwrap();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.numbers.len(), 1);
        assert!(!pipeline.is_processing());
    }

    #[tokio::test]
    async fn cancelled_run_stays_busy_until_engine_returns() {
        let (release, gate) = std::sync::mpsc::channel();
        let pipeline = Arc::new(ScanPipeline::new(Overlap::new(gate), ScanConfig::default()));

        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.process_frame(&frame(20, 20), ScanSource::Capture).await })
        };
        while pipeline.recognizer.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The caller gives up while the engine is still working.
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(pipeline.is_processing());

        let err = pipeline.process_frame(&frame(20, 20), ScanSource::Capture).await.unwrap_err();
        assert!(matches!(err, PipelineError::Busy));

        release.send(()).unwrap();
        while pipeline.is_processing() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Free again once the abandoned recognition has returned.
        release.send(()).unwrap();
        let result = pipeline.process_frame(&frame(20, 20), ScanSource::Capture).await.unwrap();
        assert_eq!(result.numbers.len(), 1);
        assert_eq!(pipeline.recognizer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.recognizer.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn process_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        std::fs::write(&path, png(30, 30)).unwrap();

        let pipeline = ScanPipeline::new(MockRecognizer::new("+1 415 555 1212"), ScanConfig::default());
        let result = pipeline.process_file(&path, ScanSource::Upload).await.unwrap();
        assert_eq!(result.numbers[0].dial_string(), "+14155551212");
    }

    #[tokio::test]
    async fn process_file_missing_is_io_error() {
        let pipeline = ScanPipeline::new(MockRecognizer::new(""), ScanConfig::default());
        let err = pipeline
            .process_file(Path::new("/nonexistent/card.png"), ScanSource::Upload)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn image_extensions_recognized() {
        assert!(is_image_path(Path::new("/tmp/a.png")));
        assert!(is_image_path(Path::new("/tmp/b.JPG")));
        assert!(!is_image_path(Path::new("/tmp/notes.txt")));
        assert!(!is_image_path(Path::new("/tmp/no_extension")));
    }

    #[tokio::test]
    async fn watcher_forwards_new_images_only() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _watcher = spawn_intake_watcher(dir.path(), tx).unwrap();

        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        std::fs::write(dir.path().join("card.png"), png(10, 10)).unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no intake event")
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "card.png");
    }

    #[test]
    fn write_events_classified() {
        use notify::event::{CreateKind, DataChange, MetadataKind, RenameMode};

        assert_eq!(write_state(&EventKind::Create(CreateKind::File)), Some(WriteState::Touched));
        assert_eq!(
            write_state(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(WriteState::Touched)
        );
        assert_eq!(
            write_state(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(WriteState::Touched)
        );
        assert_eq!(
            write_state(&EventKind::Access(AccessKind::Close(AccessMode::Write))),
            Some(WriteState::Finished)
        );
        assert_eq!(write_state(&EventKind::Access(AccessKind::Close(AccessMode::Read))), None);
        assert_eq!(write_state(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))), None);
    }

    #[test]
    fn pending_writes_settle_after_quiet_period() {
        let t0 = Instant::now();
        let quiet = Duration::from_millis(500);
        let path = PathBuf::from("/intake/card.png");
        let mut pending = PendingWrites::new(quiet);

        pending.touch(path.clone(), t0);
        assert!(pending.settled(t0 + Duration::from_millis(100)).is_empty());

        // Another chunk restarts the clock.
        pending.touch(path.clone(), t0 + Duration::from_millis(400));
        assert!(pending.settled(t0 + Duration::from_millis(800)).is_empty());
        assert_eq!(pending.settled(t0 + Duration::from_millis(900)), vec![path.clone()]);
        assert!(pending.settled(t0 + Duration::from_secs(5)).is_empty());

        pending.touch(path.clone(), t0);
        pending.finish(&path);
        assert!(pending.settled(t0 + Duration::from_secs(5)).is_empty());
    }

    #[tokio::test]
    async fn watcher_waits_for_writer_to_finish() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _watcher = spawn_intake_watcher_with(dir.path(), tx, Duration::from_millis(500)).unwrap();

        let bytes = png(64, 64);
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        let path = dir.path().join("slow.png");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(head).unwrap();
            file.flush().unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(rx.try_recv().is_err(), "forwarded a half-written file");
            file.write_all(tail).unwrap();
        }

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no intake event")
            .unwrap();
        assert_eq!(got.file_name().unwrap(), "slow.png");
        let on_disk = std::fs::read(&got).unwrap();
        assert_eq!(on_disk.len(), bytes.len());
        assert!(image::load_from_memory(&on_disk).is_ok());
    }

    #[tokio::test]
    async fn watcher_holds_files_back_when_consumer_is_slow() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let _watcher = spawn_intake_watcher_with(dir.path(), tx, Duration::from_millis(100)).unwrap();

        for name in ["a.png", "b.png", "c.png"] {
            std::fs::write(dir.path().join(name), png(10, 10)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        let mut names = Vec::new();
        for _ in 0..3 {
            let path = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("file lost from intake")
                .unwrap();
            names.push(path.file_name().unwrap().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, ["a.png", "b.png", "c.png"]);
    }
}
