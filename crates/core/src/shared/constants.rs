/// No public download location; must be placed in the model cache or the
/// bundled model directory.
pub const BLAZEFACE_MODEL_NAME: &str = "blazeface_short_range.onnx";

pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const EMBEDDING_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx";

/// Enrollment images are picked up only with these (lowercase) extensions.
pub const ENROLLMENT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Identity cache file, stored inside the enrollment root.
pub const IDENTITY_CACHE_FILENAME: &str = "_encodings.json";

/// Live frames are shrunk by this factor before detection; boxes are
/// multiplied back by the same factor before publishing.
pub const DETECTION_SCALE: u32 = 4;

/// Label published for faces with no identity under the threshold.
pub const UNKNOWN_LABEL: &str = "Unknown";

pub const FACES_UPDATE_EVENT: &str = "faces_update";
pub const LIVE_NAMESPACE: &str = "/live";
