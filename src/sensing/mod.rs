mod classifier;
mod controller;
mod loop_worker;
mod pocket;
mod profile;

pub use classifier::{ClassifierConfig, MotionBuffer, SampleClassifier};
pub use controller::{MonitorHandle, MonitorSetup, MonitoringConfig, SensingController};
pub use loop_worker::{MonitorCommand, MonitorStatus};
pub use pocket::{PocketConfig, PocketHeuristic};
pub use profile::{Sensitivity, SensitivityProfile};
