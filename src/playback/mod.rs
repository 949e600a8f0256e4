pub mod scheduler;
pub mod sink;

pub use scheduler::{PlaybackConfig, PlaybackScheduler, PlaybackState};
pub use sink::{PlaybackSink, RodioSink};
