mod fanout;
pub mod message;

pub use fanout::{ChannelHandle, DispatchConfig, DispatchFanout};
