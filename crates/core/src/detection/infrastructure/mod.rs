pub mod arcface_embedder;
pub mod execution_provider;
pub mod locator_factory;
pub mod math;
pub mod onnx_blazeface_locator;
pub mod onnx_yolo_locator;
