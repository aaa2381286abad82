mod controller;
mod state;

pub use controller::{AlertController, AlertDeps, AlertEvent};
pub use state::{AlertConfig, AlertSession, AlertState, AlertTrigger, CountdownStep};
