mod scheduler;

pub use scheduler::{
    BackgroundConfig, BackgroundScheduler, FetchResult, SchedulerMode, SchedulerStatus,
    TickResult, BACKGROUND_TASK,
};
