use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::shared::frame::Frame;
use crate::streaming::domain::connection_state::ConnectionState;
use crate::streaming::domain::frame_feed::FrameFeed;
use crate::streaming::domain::frame_source::FrameSource;

/// Produces a fresh, unopened source for each connection attempt.
pub type SourceFactory = Box<dyn FnMut() -> Box<dyn FrameSource> + Send>;

/// Keeps a best-effort live connection to a frame source and exposes the
/// most recent frame.
///
/// A single background thread opens the source, reads frames into a
/// one-slot buffer (newest overwrites oldest) and reconnects after a fixed
/// delay whenever opening or reading fails. Readers get a private copy of
/// the slot's frame.
pub struct StreamReceiver {
    shared: Arc<Shared>,
    factory: Mutex<Option<SourceFactory>>,
    retry_delay: Duration,
    read_pause: Duration,
    capture: Mutex<Option<Capture>>,
}

struct Capture {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    slot: Mutex<Option<Arc<Frame>>>,
    frames_captured: AtomicU64,
}

enum SessionEnd {
    Stopped,
    OpenFailed(String),
    ReadFailed(String),
}

impl StreamReceiver {
    pub fn new(factory: SourceFactory, retry_delay: Duration, read_pause: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            factory: Mutex::new(Some(factory)),
            retry_delay,
            read_pause,
            capture: Mutex::new(None),
        }
    }

    /// Starts the capture thread for `url` and returns immediately.
    ///
    /// A receiver runs at most one capture thread; later calls are ignored.
    pub fn connect(&self, url: &str) {
        let Some(factory) = lock(&self.factory).take() else {
            log::warn!("Stream receiver already started; ignoring connect({url})");
            return;
        };
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let url = url.to_string();
        let (retry_delay, read_pause) = (self.retry_delay, self.read_pause);
        let handle = std::thread::spawn(move || {
            capture_loop(&url, factory, &shared, &stop_rx, retry_delay, read_pause)
        });
        *lock(&self.capture) = Some(Capture { stop_tx, handle });
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Total frames read since the receiver was created.
    pub fn frames_captured(&self) -> u64 {
        self.shared.frames_captured.load(Ordering::Relaxed)
    }

    /// Stops the capture thread and waits for it to exit.
    ///
    /// Retry and read-pause sleeps are interrupted; a read already blocked
    /// on the source finishes first.
    pub fn stop(&self) {
        let Some(capture) = lock(&self.capture).take() else {
            return;
        };
        let _ = capture.stop_tx.send(());
        if capture.handle.join().is_err() {
            log::error!("Stream capture thread panicked");
        }
    }
}

impl FrameFeed for StreamReceiver {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn latest_frame(&self) -> Option<Frame> {
        let frame = lock(&self.shared.slot).clone()?;
        Some(Frame::clone(&frame))
    }

    fn wait_connected(&self, timeout: Duration) -> bool {
        let guard = lock(&self.shared.state);
        let (guard, _) = self
            .shared
            .state_changed
            .wait_timeout_while(guard, timeout, |s| *s != ConnectionState::Connected)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == ConnectionState::Connected
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if previous != state {
            log::debug!("Stream {previous} -> {state}");
        }
        self.state_changed.notify_all();
    }

    fn store(&self, frame: Frame) {
        let index = self.frames_captured.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Arc::new(frame.with_index(index));
        *lock(&self.slot) = Some(frame);
    }

    /// A dropped connection makes the last frame unavailable immediately.
    fn disconnect(&self) {
        *lock(&self.slot) = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

/// The slot and state hold plain data, so a panic while a guard was held
/// cannot leave them half-updated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn capture_loop(
    url: &str,
    mut factory: SourceFactory,
    shared: &Shared,
    stop_rx: &Receiver<()>,
    retry_delay: Duration,
    read_pause: Duration,
) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_session(url, &mut factory, shared, stop_rx, read_pause)
        }));
        shared.disconnect();

        match outcome {
            Ok(SessionEnd::Stopped) => break,
            Ok(SessionEnd::OpenFailed(e)) => log::error!("Failed to open stream {url}: {e}"),
            Ok(SessionEnd::ReadFailed(e)) => log::warn!("Stream {url} read failed: {e}"),
            Err(_) => log::error!("Unexpected failure in capture loop for {url}"),
        }

        log::info!("Reconnecting in {:.1}s", retry_delay.as_secs_f64());
        match stop_rx.recv_timeout(retry_delay) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }
    log::info!("Stream capture for {url} stopped");
}

fn run_session(
    url: &str,
    factory: &mut SourceFactory,
    shared: &Shared,
    stop_rx: &Receiver<()>,
    read_pause: Duration,
) -> SessionEnd {
    let mut source = factory();
    if let Err(e) = source.open(url) {
        source.close();
        return SessionEnd::OpenFailed(e.to_string());
    }
    log::info!("Connected to stream {url}");
    shared.set_state(ConnectionState::Connected);

    let end = loop {
        match source.read() {
            Ok(frame) => shared.store(frame),
            Err(e) => break SessionEnd::ReadFailed(e.to_string()),
        }
        match stop_rx.recv_timeout(read_pause) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break SessionEnd::Stopped,
        }
    };
    source.close();
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    type Script = Receiver<Result<Frame, String>>;

    /// Reads whatever the test pushes into the script.
    struct ScriptedSource {
        frames: Script,
        open_ok: bool,
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self, _url: &str) -> Result<(), Box<dyn std::error::Error>> {
            if self.open_ok {
                Ok(())
            } else {
                Err("connection refused".into())
            }
        }

        fn read(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
            match self.frames.recv_timeout(Duration::from_secs(5)) {
                Ok(Ok(frame)) => Ok(frame),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err("script exhausted".into()),
            }
        }

        fn close(&mut self) {}
    }

    fn scripted(opens: Vec<bool>) -> (SourceFactory, Sender<Result<Frame, String>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut opens = opens.into_iter();
        // Missing entries in `opens` succeed
        let factory: SourceFactory = Box::new(move || -> Box<dyn FrameSource> {
            Box::new(ScriptedSource {
                frames: rx.clone(),
                open_ok: opens.next().unwrap_or(true),
            })
        });
        (factory, tx)
    }

    fn solid(value: u8) -> Frame {
        Frame::new(vec![value; 4 * 2 * 3], 4, 2, 3, 0)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn receiver(factory: SourceFactory, retry_delay: Duration) -> StreamReceiver {
        StreamReceiver::new(factory, retry_delay, Duration::from_millis(1))
    }

    #[test]
    fn test_not_connected_before_connect() {
        let (factory, _tx) = scripted(vec![]);
        let rx = receiver(factory, Duration::from_millis(10));
        assert_eq!(rx.state(), ConnectionState::Disconnected);
        assert!(!rx.is_connected());
        assert!(rx.latest_frame().is_none());
        assert!(!rx.wait_connected(Duration::from_millis(20)));
    }

    #[test]
    fn test_latest_frame_is_newest() {
        let (factory, tx) = scripted(vec![]);
        let rx = receiver(factory, Duration::from_millis(10));
        rx.connect("test://cam");
        assert!(rx.wait_connected(Duration::from_secs(5)));

        tx.send(Ok(solid(1))).unwrap();
        tx.send(Ok(solid(2))).unwrap();
        assert!(wait_until(|| rx.frames_captured() == 2));

        let frame = rx.latest_frame().unwrap();
        assert_eq!(frame.data(), solid(2).data());
        assert_eq!(frame.index(), 2);
        drop(tx);
        rx.stop();
    }

    #[test]
    fn test_concurrent_reader_never_sees_mixed_frame() {
        let (factory, tx) = scripted(vec![]);
        let rx = Arc::new(receiver(factory, Duration::from_millis(10)));
        rx.connect("test://cam");
        assert!(rx.wait_connected(Duration::from_secs(5)));

        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let (rx, done) = (Arc::clone(&rx), Arc::clone(&done));
            std::thread::spawn(move || {
                let mut seen = 0;
                while seen == 0 || !done.load(Ordering::SeqCst) {
                    if let Some(frame) = rx.latest_frame() {
                        let first = frame.data()[0];
                        assert!(frame.data().iter().all(|&b| b == first));
                        seen += 1;
                    }
                }
                seen
            })
        };

        let big = |value: u8| Frame::new(vec![value; 64 * 64 * 3], 64, 64, 3, 0);
        for i in 0..200u32 {
            tx.send(Ok(big(if i % 2 == 0 { 10 } else { 20 }))).unwrap();
        }
        assert!(wait_until(|| rx.frames_captured() == 200));
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);
        drop(tx);
        rx.stop();
    }

    #[test]
    fn test_read_failure_clears_frame_and_connection() {
        let (factory, tx) = scripted(vec![]);
        let rx = receiver(factory, Duration::from_secs(30));
        rx.connect("test://cam");
        tx.send(Ok(solid(7))).unwrap();
        assert!(wait_until(|| rx.latest_frame().is_some()));
        assert!(rx.is_connected());

        tx.send(Err("socket reset".into())).unwrap();
        assert!(wait_until(|| !rx.is_connected()));
        assert!(rx.latest_frame().is_none());
        // stop must cut the 30 s retry delay short
        let started = Instant::now();
        rx.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_reconnects_after_open_failure() {
        let (factory, tx) = scripted(vec![false, false, true]);
        let rx = receiver(factory, Duration::from_millis(10));
        rx.connect("test://cam");
        assert!(rx.wait_connected(Duration::from_secs(5)));

        tx.send(Ok(solid(3))).unwrap();
        assert!(wait_until(|| rx.latest_frame().is_some()));
        drop(tx);
        rx.stop();
    }

    #[test]
    fn test_reconnects_after_read_failure() {
        let (factory, tx) = scripted(vec![]);
        let rx = receiver(factory, Duration::from_millis(10));
        rx.connect("test://cam");
        tx.send(Ok(solid(1))).unwrap();
        tx.send(Err("eof".into())).unwrap();
        tx.send(Ok(solid(9))).unwrap();

        assert!(wait_until(|| rx
            .latest_frame()
            .is_some_and(|f| f.data() == solid(9).data())));
        assert!(rx.is_connected());
        assert_eq!(rx.frames_captured(), 2);
        drop(tx);
        rx.stop();
    }

    #[test]
    fn test_second_connect_is_ignored() {
        let (factory, tx) = scripted(vec![]);
        let rx = receiver(factory, Duration::from_millis(10));
        rx.connect("test://one");
        rx.connect("test://two");
        assert!(rx.wait_connected(Duration::from_secs(5)));
        drop(tx);
        rx.stop();
        rx.stop();
        assert_eq!(rx.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_panicking_source_is_retried() {
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&attempts);
        let (tx, frames) = crossbeam_channel::unbounded();
        let factory: SourceFactory = Box::new(move || -> Box<dyn FrameSource> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("driver bug");
            }
            Box::new(ScriptedSource {
                frames: frames.clone(),
                open_ok: true,
            })
        });
        let rx = receiver(factory, Duration::from_millis(10));
        rx.connect("test://cam");
        assert!(rx.wait_connected(Duration::from_secs(5)));
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        drop(tx);
        rx.stop();
    }
}
