mod coordinator;

pub use coordinator::{any_ready, CameraHandle, CaptureConfig, CaptureCoordinator};
