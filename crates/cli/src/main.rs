mod camera_control;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use facewatch_core::pipeline::face_recognizer::FaceRecognizer;
use facewatch_core::pipeline::frame_analyzer::FrameAnalyzer;
use facewatch_core::pipeline::infrastructure::threaded_detection_executor::AnalyzerFactory;
use facewatch_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use facewatch_core::pipeline::recognition_worker::{RecognitionWorker, WorkerConfig};
use facewatch_core::publishing::infrastructure::json_lines_publisher::JsonLinesPublisher;
use facewatch_core::shared::config::{
    CameraConfig, ConfigError, DetectionModel, FacewatchConfig, StreamBackend,
};
use facewatch_core::streaming::infrastructure::source_factory::create_source_factory;
use facewatch_core::streaming::stream_receiver::StreamReceiver;

use camera_control::CameraControl;

const READY_POLL: Duration = Duration::from_millis(200);

/// Live face recognition on an MJPEG camera stream.
///
/// Recognition results are written to stdout as one JSON event per line.
#[derive(Parser, Debug)]
#[command(name = "facewatch")]
struct Cli {
    /// JSON config file; flags and environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// MJPEG stream URL.
    #[arg(long, env = "RASPI_STREAM_URL")]
    stream_url: Option<String>,

    /// Stream backend: mjpeg or ffmpeg.
    #[arg(long)]
    backend: Option<StreamBackend>,

    /// Seconds between reconnect attempts.
    #[arg(long)]
    reconnect_delay: Option<f64>,

    /// Enrollment directory (one subdirectory per person).
    #[arg(long, env = "FACE_DATA_DIR")]
    face_data_dir: Option<PathBuf>,

    /// Directory searched for ONNX models before downloading.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Face detection model: yolo or blazeface.
    #[arg(long, env = "RECOGNITION_MODEL")]
    detection_model: Option<DetectionModel>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Seconds between recognition cycles.
    #[arg(long, env = "WORKER_SLEEP_INTERVAL")]
    worker_sleep_interval: Option<f64>,

    /// Maximum cosine distance for a match (lower is stricter).
    #[arg(long, env = "FACE_MATCH_THRESHOLD")]
    match_threshold: Option<f64>,

    /// Camera control API; when set the camera is initialised on startup
    /// and released on shutdown.
    #[arg(long, env = "RASPI_API_BASE_URL")]
    camera_api: Option<String>,

    #[arg(long, env = "RASPI_CAMERA_WIDTH")]
    camera_width: Option<u32>,

    #[arg(long, env = "RASPI_CAMERA_HEIGHT")]
    camera_height: Option<u32>,
}

impl Cli {
    /// Layers flags over the config file (or defaults).
    fn into_config(self) -> Result<FacewatchConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => FacewatchConfig::load(path)?,
            None => FacewatchConfig::default(),
        };

        if let Some(url) = self.stream_url {
            config.stream_url = url;
        }
        if let Some(backend) = self.backend {
            config.stream_backend = backend;
        }
        if let Some(delay) = self.reconnect_delay {
            config.reconnect_delay_secs = delay;
        }
        if let Some(dir) = self.face_data_dir {
            config.face_data_dir = dir;
        }
        if self.model_dir.is_some() {
            config.model_dir = self.model_dir;
        }
        if let Some(model) = self.detection_model {
            config.detection_model = model;
        }
        if let Some(confidence) = self.confidence {
            config.detection_confidence = confidence;
        }
        if let Some(interval) = self.worker_sleep_interval {
            config.worker_sleep_interval_secs = interval;
        }
        if let Some(threshold) = self.match_threshold {
            config.face_match_threshold = threshold;
        }

        if let Some(api_base_url) = self.camera_api {
            let (width, height) = config
                .camera
                .as_ref()
                .map_or((640, 480), |c| (c.width, c.height));
            config.camera = Some(CameraConfig {
                api_base_url,
                width,
                height,
            });
        }
        if let Some(camera) = config.camera.as_mut() {
            if let Some(width) = self.camera_width {
                camera.width = width;
            }
            if let Some(height) = self.camera_height {
                camera.height = height;
            }
        }
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;
    config.validate()?;

    let camera = config
        .camera
        .as_ref()
        .map(CameraControl::from_config)
        .transpose()?;
    if let Some(camera) = &camera {
        camera.init()?;
        log::info!("Camera initialised");
    }

    let receiver = Arc::new(StreamReceiver::new(
        create_source_factory(config.stream_backend)?,
        config.reconnect_delay(),
        config.read_pause(),
    ));
    receiver.connect(&config.stream_url);

    let analyzer_config = config.clone();
    let analyzer_factory: AnalyzerFactory = Box::new(
        move || -> Result<Box<dyn FrameAnalyzer>, Box<dyn std::error::Error>> {
            Ok(Box::new(FaceRecognizer::from_config(&analyzer_config)?))
        },
    );
    let worker = RecognitionWorker::new(
        WorkerConfig::from_config(&config),
        receiver.clone(),
        analyzer_factory,
        Arc::new(JsonLinesPublisher::stdout()),
        Box::new(StdoutPipelineLogger::default()),
    );

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    worker.start();
    let ready = loop {
        if let Some(outcome) = worker.wait_ready_timeout(READY_POLL) {
            break Some(outcome);
        }
        if stop_rx.try_recv().is_ok() {
            break None;
        }
    };
    match &ready {
        Some(Ok(())) => {
            log::info!("Watching {} (Ctrl-C to stop)", config.stream_url);
            let _ = stop_rx.recv();
        }
        Some(Err(_)) => {}
        None => log::info!("Interrupted during startup"),
    }

    log::info!("Shutting down...");
    let logger = worker.stop();
    receiver.stop();
    log::info!("Captured {} frames", receiver.frames_captured());
    if let Some(camera) = &camera {
        match camera.release() {
            Ok(()) => log::info!("Camera released"),
            Err(e) => log::warn!("Failed to release camera: {e}"),
        }
    }
    if let Some(logger) = logger {
        logger.summary();
    }
    match ready {
        Some(Err(e)) => Err(format!("face recognition failed to start: {e}").into()),
        _ => Ok(()),
    }
}
