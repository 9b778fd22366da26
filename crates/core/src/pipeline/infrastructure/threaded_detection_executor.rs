use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::pipeline::frame_analyzer::FrameAnalyzer;
use crate::recognition::domain::detected_face::DetectionBatch;
use crate::shared::frame::Frame;

/// Errors crossing the thread boundary must be `Send`.
pub type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Builds the analyzer on the detection thread, so model loading and the
/// identity-store build happen off the caller's thread.
pub type AnalyzerFactory =
    Box<dyn FnOnce() -> Result<Box<dyn FrameAnalyzer>, Box<dyn std::error::Error>> + Send>;

enum Job {
    Analyze(Frame, Sender<Result<DetectionBatch, SendError>>),
    Reload(Sender<Result<(), SendError>>),
    Shutdown,
}

/// Runs the CPU-bound analyzer on a dedicated thread.
///
/// The job queue holds a single entry, so at most one frame is waiting
/// behind the one being analyzed. Each job carries its own reply channel;
/// callers can wait on it alongside their own stop signal.
pub struct ThreadedDetectionExecutor {
    jobs: Sender<Job>,
    ready: Receiver<Result<(), SendError>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedDetectionExecutor {
    pub fn spawn(factory: AnalyzerFactory) -> Self {
        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded::<Job>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let handle = std::thread::spawn(move || run_detection_thread(factory, jobs_rx, ready_tx));
        Self {
            jobs: jobs_tx,
            ready: ready_rx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Yields exactly one message once the analyzer is built (or failed to
    /// build).
    pub fn ready(&self) -> &Receiver<Result<(), SendError>> {
        &self.ready
    }

    /// Queues `frame` and returns the channel its result will arrive on.
    pub fn submit(
        &self,
        frame: Frame,
    ) -> Result<Receiver<Result<DetectionBatch, SendError>>, SendError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.jobs
            .send(Job::Analyze(frame, reply_tx))
            .map_err(|_| -> SendError { "detection thread has exited".into() })?;
        Ok(reply_rx)
    }

    /// Rebuilds the analyzer's identities; blocks until done.
    pub fn reload(&self) -> Result<(), SendError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.jobs
            .send(Job::Reload(reply_tx))
            .map_err(|_| -> SendError { "detection thread has exited".into() })?;
        reply_rx
            .recv()
            .map_err(|_| -> SendError { "detection thread dropped the reload".into() })?
    }

    /// Lets the in-flight job finish, then stops and joins the thread.
    pub fn shutdown(&self) {
        let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        // Fails only if the thread already exited
        let _ = self.jobs.send(Job::Shutdown);
        if handle.join().is_err() {
            log::error!("Detection thread panicked");
        }
    }
}

impl Drop for ThreadedDetectionExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_detection_thread(
    factory: AnalyzerFactory,
    jobs: Receiver<Job>,
    ready: Sender<Result<(), SendError>>,
) {
    let built = panic::catch_unwind(AssertUnwindSafe(factory));
    let mut analyzer = match built {
        Ok(Ok(analyzer)) => {
            let _ = ready.send(Ok(()));
            analyzer
        }
        Ok(Err(e)) => {
            let _ = ready.send(Err(e.to_string().into()));
            return;
        }
        Err(payload) => {
            let _ = ready.send(Err(panic_message(payload.as_ref()).into()));
            return;
        }
    };

    for job in jobs {
        match job {
            Job::Analyze(frame, reply) => {
                let result = guarded(|| analyzer.analyze(&frame));
                let _ = reply.send(result);
            }
            Job::Reload(reply) => {
                let result = guarded(|| analyzer.reload());
                let _ = reply.send(result);
            }
            Job::Shutdown => break,
        }
    }
}

/// Runs one analyzer call, turning both errors and panics into `SendError`.
fn guarded<T>(
    f: impl FnOnce() -> Result<T, Box<dyn std::error::Error>>,
) -> Result<T, SendError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string().into()),
        Err(payload) => Err(panic_message(payload.as_ref()).into()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("analyzer panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::detected_face::DetectedFace;
    use crate::shared::bounding_box::BoundingBox;
    use std::time::Duration;

    /// Reports one face per frame whose first byte is non-zero; panics on
    /// byte 0xEE.
    struct ByteAnalyzer {
        reloads: usize,
    }

    impl FrameAnalyzer for ByteAnalyzer {
        fn analyze(
            &mut self,
            frame: &Frame,
        ) -> Result<DetectionBatch, Box<dyn std::error::Error>> {
            let faces = match frame.data()[0] {
                0 => vec![],
                0xEE => panic!("corrupt frame"),
                0xFF => return Err("unreadable frame".into()),
                _ => vec![DetectedFace::new(
                    Some(format!("reload-{}", self.reloads)),
                    BoundingBox::new(0, 0, 1, 1),
                )],
            };
            Ok(DetectionBatch::new(frame.index(), faces))
        }

        fn reload(&mut self) -> Result<(), Box<dyn std::error::Error>> {
            self.reloads += 1;
            Ok(())
        }
    }

    fn executor() -> ThreadedDetectionExecutor {
        let exec = ThreadedDetectionExecutor::spawn(Box::new(|| {
            Ok(Box::new(ByteAnalyzer { reloads: 0 }) as Box<dyn FrameAnalyzer>)
        }));
        exec.ready()
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        exec
    }

    fn analyze(exec: &ThreadedDetectionExecutor, byte: u8) -> Result<DetectionBatch, SendError> {
        let frame = Frame::new(vec![byte; 3], 1, 1, 3, 9);
        exec.submit(frame)
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_analyze_returns_batch() {
        let exec = executor();
        let batch = analyze(&exec, 1).unwrap();
        assert_eq!(batch.frame_index, 9);
        assert_eq!(batch.labels(), vec!["reload-0"]);
        assert!(analyze(&exec, 0).unwrap().is_empty());
    }

    #[test]
    fn test_error_and_panic_do_not_kill_thread() {
        let exec = executor();
        assert!(analyze(&exec, 0xFF).is_err());
        let err = analyze(&exec, 0xEE).unwrap_err();
        assert!(err.to_string().contains("corrupt frame"));
        assert!(analyze(&exec, 1).is_ok());
    }

    #[test]
    fn test_reload_runs_on_detection_thread() {
        let exec = executor();
        exec.reload().unwrap();
        exec.reload().unwrap();
        assert_eq!(analyze(&exec, 1).unwrap().labels(), vec!["reload-2"]);
    }

    #[test]
    fn test_factory_failure_is_reported() {
        let exec = ThreadedDetectionExecutor::spawn(Box::new(
            || -> Result<Box<dyn FrameAnalyzer>, Box<dyn std::error::Error>> {
                Err("no models".into())
            },
        ));
        let ready = exec.ready().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ready.unwrap_err().to_string().contains("no models"));
        // The thread is gone; submissions fail instead of hanging
        let frame = Frame::new(vec![1; 3], 1, 1, 3, 0);
        let submitted = exec.submit(frame);
        assert!(submitted.is_err() || submitted.unwrap().recv().is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let exec = executor();
        exec.shutdown();
        exec.shutdown();
        assert!(exec.reload().is_err());
    }
}
