pub mod schedule;
pub mod timer;

pub use schedule::{Fired, TimerHandle, TimerQueue};
pub use timer::{CalibrationStats, HighPrecisionTimer, ManualTimer, Timer};
