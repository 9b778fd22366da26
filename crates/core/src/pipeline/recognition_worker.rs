use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};

use crate::publishing::domain::detection_publisher::DetectionPublisher;
use crate::recognition::domain::detected_face::FacesUpdate;
use crate::shared::config::FacewatchConfig;
use crate::streaming::domain::frame_feed::FrameFeed;

use super::infrastructure::threaded_detection_executor::{
    AnalyzerFactory, SendError, ThreadedDetectionExecutor,
};
use super::pipeline_logger::PipelineLogger;

/// How often the "waiting for stream" warning repeats.
const CONNECT_WARN_INTERVAL: Duration = Duration::from_secs(5);
/// Granularity of the connection wait, bounding how late a stop is noticed.
const CONNECT_CHECK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub connect_warn_interval: Duration,
}

impl WorkerConfig {
    pub fn from_config(config: &FacewatchConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            connect_warn_interval: CONNECT_WARN_INTERVAL,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_config(&FacewatchConfig::default())
    }
}

/// Drives the detect-and-publish loop.
///
/// `start` spawns the detection thread (which builds the identity store) and
/// a worker thread that waits for the feed to connect, then once per poll
/// interval analyzes the latest frame and publishes the result. A worker
/// runs at most once: `start` after the first call is a no-op, and a
/// stopped worker stays stopped.
pub struct RecognitionWorker {
    config: WorkerConfig,
    feed: Arc<dyn FrameFeed>,
    publisher: Arc<dyn DetectionPublisher>,
    pending: Mutex<Option<Pending>>,
    running: Mutex<Option<Running>>,
    readiness: Mutex<Option<Result<(), String>>>,
}

struct Pending {
    analyzer_factory: AnalyzerFactory,
    logger: Box<dyn PipelineLogger>,
}

struct Running {
    stop_tx: Sender<()>,
    ready_rx: Receiver<Result<(), SendError>>,
    executor: Arc<ThreadedDetectionExecutor>,
    handle: JoinHandle<Box<dyn PipelineLogger>>,
}

/// Everything the worker thread owns.
struct WorkerLoop {
    config: WorkerConfig,
    feed: Arc<dyn FrameFeed>,
    publisher: Arc<dyn DetectionPublisher>,
    executor: Arc<ThreadedDetectionExecutor>,
    stop_rx: Receiver<()>,
    ready_tx: Sender<Result<(), SendError>>,
    logger: Box<dyn PipelineLogger>,
    last_frame_index: Option<u64>,
}

enum Cycle {
    Idle,
    Published,
    Stopped,
}

impl RecognitionWorker {
    pub fn new(
        config: WorkerConfig,
        feed: Arc<dyn FrameFeed>,
        analyzer_factory: AnalyzerFactory,
        publisher: Arc<dyn DetectionPublisher>,
        logger: Box<dyn PipelineLogger>,
    ) -> Self {
        Self {
            config,
            feed,
            publisher,
            pending: Mutex::new(Some(Pending {
                analyzer_factory,
                logger,
            })),
            running: Mutex::new(None),
            readiness: Mutex::new(None),
        }
    }

    /// Starts the worker. Returns `false` if it was already started.
    pub fn start(&self) -> bool {
        let Some(pending) = lock(&self.pending).take() else {
            log::debug!("Recognition worker already started");
            return false;
        };
        let executor = Arc::new(ThreadedDetectionExecutor::spawn(pending.analyzer_factory));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let worker = WorkerLoop {
            config: self.config,
            feed: Arc::clone(&self.feed),
            publisher: Arc::clone(&self.publisher),
            executor: Arc::clone(&executor),
            stop_rx,
            ready_tx,
            logger: pending.logger,
            last_frame_index: None,
        };
        let handle = std::thread::spawn(move || worker.run());
        *lock(&self.running) = Some(Running {
            stop_tx,
            ready_rx,
            executor,
            handle,
        });
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Blocks until the analyzer (models and identity store) is built.
    ///
    /// An error means the worker has given up and will never publish; the
    /// outcome is remembered, so later calls return it immediately.
    pub fn wait_ready(&self) -> Result<(), SendError> {
        self.poll_readiness(None)
            .unwrap_or_else(|| Err("recognition worker is not ready".into()))
    }

    /// Like [`wait_ready`](Self::wait_ready), but returns `None` if the
    /// analyzer is still being built after `timeout`.
    pub fn wait_ready_timeout(&self, timeout: Duration) -> Option<Result<(), SendError>> {
        self.poll_readiness(Some(timeout))
    }

    fn poll_readiness(&self, timeout: Option<Duration>) -> Option<Result<(), SendError>> {
        let ready_rx = match lock(&self.running).as_ref() {
            Some(running) => running.ready_rx.clone(),
            None => return Some(Err("recognition worker is not running".into())),
        };
        let mut readiness = lock(&self.readiness);
        if readiness.is_none() {
            let received = match timeout {
                Some(timeout) => match ready_rx.recv_timeout(timeout) {
                    Ok(result) => Some(result),
                    Err(RecvTimeoutError::Timeout) => return None,
                    Err(RecvTimeoutError::Disconnected) => None,
                },
                None => ready_rx.recv().ok(),
            };
            *readiness = Some(match received {
                Some(result) => result.map_err(|e| e.to_string()),
                None => Err("recognition worker stopped before it was ready".to_string()),
            });
        }
        readiness
            .as_ref()
            .map(|outcome| outcome.clone().map_err(Into::into))
    }

    /// Discards the identity cache and rebuilds it from the enrollment
    /// images. Blocks until the rebuild finishes; detection pauses meanwhile.
    pub fn reload_identities(&self) -> Result<(), SendError> {
        let executor = lock(&self.running)
            .as_ref()
            .map(|r| Arc::clone(&r.executor))
            .ok_or("recognition worker is not running")?;
        executor.reload()
    }

    /// Stops both threads and returns the pipeline logger, or `None` if
    /// the worker was never started or already stopped.
    ///
    /// Waits for an in-flight detection to finish.
    pub fn stop(&self) -> Option<Box<dyn PipelineLogger>> {
        let running = lock(&self.running).take()?;
        let _ = running.stop_tx.send(());
        let logger = match running.handle.join() {
            Ok(logger) => Some(logger),
            Err(_) => {
                log::error!("Recognition worker thread panicked");
                None
            }
        };
        running.executor.shutdown();
        log::info!("Recognition worker stopped");
        logger
    }
}

impl Drop for RecognitionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn widen(e: SendError) -> Box<dyn std::error::Error> {
    e
}

impl WorkerLoop {
    fn run(mut self) -> Box<dyn PipelineLogger> {
        if !self.await_analyzer() || !self.await_stream() {
            return self.logger;
        }
        log::info!("Recognition worker running");

        loop {
            match self.stop_rx.recv_timeout(self.config.poll_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
            match self.cycle() {
                Ok(Cycle::Stopped) => break,
                Ok(Cycle::Idle | Cycle::Published) => {}
                Err(e) => log::error!("Recognition cycle failed: {e}"),
            }
        }
        self.logger
    }

    /// Waits for the detection thread to build its analyzer and reports the
    /// outcome to [`RecognitionWorker::wait_ready`].
    fn await_analyzer(&mut self) -> bool {
        let started = Instant::now();
        let outcome = select! {
            recv(self.executor.ready()) -> ready => match ready {
                Ok(outcome) => outcome,
                Err(_) => Err("detection thread exited during startup".into()),
            },
            recv(self.stop_rx) -> _ => return false,
        };
        let ready = match &outcome {
            Ok(()) => {
                self.logger
                    .timing("startup", started.elapsed().as_secs_f64() * 1000.0);
                true
            }
            Err(e) => {
                log::error!("Failed to prepare face recognition: {e}");
                false
            }
        };
        let _ = self.ready_tx.send(outcome);
        ready
    }

    /// Blocks until the feed is connected, warning periodically. There is
    /// no deadline; only a stop request ends the wait early.
    fn await_stream(&mut self) -> bool {
        let mut last_warning = Instant::now();
        while !self.feed.wait_connected(CONNECT_CHECK_INTERVAL) {
            match self.stop_rx.try_recv() {
                Ok(()) | Err(crossbeam_channel::TryRecvError::Disconnected) => return false,
                Err(crossbeam_channel::TryRecvError::Empty) => {}
            }
            if last_warning.elapsed() >= self.config.connect_warn_interval {
                log::warn!("Waiting for video stream to connect...");
                last_warning = Instant::now();
            }
        }
        true
    }

    fn cycle(&mut self) -> Result<Cycle, Box<dyn std::error::Error>> {
        let Some(frame) = self.feed.latest_frame() else {
            return Ok(Cycle::Idle);
        };
        let frame_index = frame.index();
        if let Some(last) = self.last_frame_index {
            let skipped = frame_index.saturating_sub(last).saturating_sub(1);
            self.logger.metric("frames_skipped", skipped as f64);
        }
        self.last_frame_index = Some(frame_index);

        let detect_start = Instant::now();
        let reply = self.executor.submit(frame).map_err(widen)?;
        let batch = select! {
            recv(reply) -> result => match result {
                Ok(batch) => batch.map_err(widen)?,
                Err(_) => return Err("detection thread dropped the frame".into()),
            },
            recv(self.stop_rx) -> _ => return Ok(Cycle::Stopped),
        };
        self.logger
            .timing("detect", detect_start.elapsed().as_secs_f64() * 1000.0);
        self.logger.metric("faces", batch.faces.len() as f64);

        if batch.is_empty() {
            log::debug!("No faces in frame #{frame_index}");
        } else {
            log::info!(
                "Detected {} face(s) in frame #{frame_index}: {}",
                batch.faces.len(),
                batch.labels().join(", ")
            );
        }

        let publish_start = Instant::now();
        self.publisher.publish(&FacesUpdate::from(&batch))?;
        self.logger
            .timing("publish", publish_start.elapsed().as_secs_f64() * 1000.0);
        self.logger.cycle(frame_index);
        Ok(Cycle::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame_analyzer::FrameAnalyzer;
    use crate::pipeline::pipeline_logger::{NullPipelineLogger, StdoutPipelineLogger};
    use crate::publishing::infrastructure::channel_publisher::ChannelPublisher;
    use crate::recognition::domain::detected_face::{DetectedFace, DetectionBatch};
    use crate::shared::bounding_box::BoundingBox;
    use crate::shared::frame::Frame;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    /// Feed whose connectivity and frame the test controls directly.
    #[derive(Default)]
    struct ManualFeed {
        connected: AtomicBool,
        next_index: AtomicU64,
        pixel: Mutex<Option<u8>>,
    }

    impl ManualFeed {
        fn show(&self, pixel: u8) {
            *self.pixel.lock().unwrap() = Some(pixel);
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    impl FrameFeed for ManualFeed {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn latest_frame(&self) -> Option<Frame> {
            let pixel = (*self.pixel.lock().unwrap())?;
            let index = self.next_index.fetch_add(1, Ordering::SeqCst) + 1;
            Some(Frame::new(vec![pixel; 3], 1, 1, 3, index))
        }

        fn wait_connected(&self, timeout: Duration) -> bool {
            if !self.is_connected() {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
            }
            self.is_connected()
        }
    }

    /// 0 = no faces, 0xFF = error, 0xEE = panic, anything else = one face.
    struct PixelAnalyzer {
        reloads: Arc<AtomicUsize>,
    }

    impl FrameAnalyzer for PixelAnalyzer {
        fn analyze(
            &mut self,
            frame: &Frame,
        ) -> Result<DetectionBatch, Box<dyn std::error::Error>> {
            let faces = match frame.data()[0] {
                0 => vec![],
                0xFF => return Err("bad frame".into()),
                0xEE => panic!("analyzer bug"),
                _ => vec![DetectedFace::new(
                    Some("alice".into()),
                    BoundingBox::new(10, 20, 30, 40),
                )],
            };
            Ok(DetectionBatch::new(frame.index(), faces))
        }

        fn reload(&mut self) -> Result<(), Box<dyn std::error::Error>> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        feed: Arc<ManualFeed>,
        updates: Receiver<FacesUpdate>,
        reloads: Arc<AtomicUsize>,
        worker: RecognitionWorker,
    }

    fn harness() -> Harness {
        let feed = Arc::new(ManualFeed::default());
        let publisher = Arc::new(ChannelPublisher::new());
        let updates = publisher.subscribe();
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reloads);
        let factory: AnalyzerFactory = Box::new(move || {
            Ok(Box::new(PixelAnalyzer { reloads: counter }) as Box<dyn FrameAnalyzer>)
        });
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(5),
            connect_warn_interval: Duration::from_millis(20),
        };
        let worker = RecognitionWorker::new(
            config,
            feed.clone(),
            factory,
            publisher,
            Box::new(StdoutPipelineLogger::new(1)),
        );
        Harness {
            feed,
            updates,
            reloads,
            worker,
        }
    }

    fn next_update(updates: &Receiver<FacesUpdate>) -> FacesUpdate {
        updates.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_publishes_detected_faces() {
        let h = harness();
        h.feed.show(1);
        assert!(h.worker.start());

        let update = next_update(&h.updates);
        assert_eq!(update.faces.len(), 1);
        assert_eq!(update.faces[0].id, "alice");
        assert_eq!((update.faces[0].x, update.faces[0].w), (10, 30));
        h.worker.stop();
    }

    #[test]
    fn test_empty_batch_is_still_published() {
        let h = harness();
        h.feed.show(0);
        h.worker.start();
        assert!(next_update(&h.updates).faces.is_empty());
        h.worker.stop();
    }

    #[test]
    fn test_nothing_published_until_connected() {
        let h = harness();
        h.worker.start();
        assert!(h
            .updates
            .recv_timeout(Duration::from_millis(100))
            .is_err());

        h.feed.show(1);
        assert_eq!(next_update(&h.updates).faces.len(), 1);
        h.worker.stop();
    }

    #[test]
    fn test_failing_cycles_do_not_stop_the_worker() {
        let h = harness();
        h.feed.show(0xFF);
        h.worker.start();
        std::thread::sleep(Duration::from_millis(30));
        h.feed.show(0xEE);
        std::thread::sleep(Duration::from_millis(30));
        assert!(h.updates.try_recv().is_err());
        assert!(h.worker.is_running());

        h.feed.show(1);
        assert_eq!(next_update(&h.updates).faces[0].id, "alice");
        h.worker.stop();
    }

    #[test]
    fn test_start_is_idempotent() {
        let h = harness();
        assert!(h.worker.start());
        assert!(!h.worker.start());
        assert!(h.worker.stop().is_some());
        assert!(h.worker.stop().is_none());
        assert!(!h.worker.start());
    }

    #[test]
    fn test_stop_while_waiting_for_stream() {
        let h = harness();
        h.worker.start();
        std::thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        assert!(h.worker.stop().is_some());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_reload_reaches_analyzer() {
        let h = harness();
        assert!(h.worker.reload_identities().is_err());
        h.worker.start();
        h.worker.reload_identities().unwrap();
        assert_eq!(h.reloads.load(Ordering::SeqCst), 1);
        h.worker.stop();
    }

    #[test]
    fn test_analyzer_build_failure_ends_worker() {
        let feed = Arc::new(ManualFeed::default());
        feed.show(1);
        let publisher = Arc::new(ChannelPublisher::new());
        let updates = publisher.subscribe();
        let worker = RecognitionWorker::new(
            WorkerConfig::default(),
            feed,
            Box::new(|| -> Result<Box<dyn FrameAnalyzer>, Box<dyn std::error::Error>> {
                Err("models missing".into())
            }),
            publisher,
            Box::new(NullPipelineLogger),
        );
        worker.start();
        let err = worker.wait_ready().unwrap_err();
        assert!(err.to_string().contains("models missing"));
        // Remembered for later callers
        assert!(worker.wait_ready().is_err());
        assert!(updates.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(worker.stop().is_some());
    }

    #[test]
    fn test_wait_ready_after_successful_start() {
        let h = harness();
        assert!(h.worker.wait_ready().is_err(), "not started yet");
        h.worker.start();
        h.worker.wait_ready().unwrap();
        h.worker.wait_ready().unwrap();
        assert!(matches!(
            h.worker.wait_ready_timeout(Duration::ZERO),
            Some(Ok(()))
        ));
        h.worker.stop();
    }

    #[test]
    fn test_frames_are_polled_repeatedly() {
        let h = harness();
        h.feed.show(1);
        h.worker.start();
        next_update(&h.updates);
        next_update(&h.updates);
        h.worker.stop();
        assert!(h.feed.next_index.load(Ordering::SeqCst) >= 2);
    }
}
