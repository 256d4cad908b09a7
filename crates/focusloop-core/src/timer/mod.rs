mod engine;
mod mode;
mod scheduler;

pub use engine::{EngineConfig, TimerEngine};
pub use mode::TimerMode;
pub use scheduler::{FramePacedScheduler, IntervalScheduler, Scheduler, SchedulingStrategy, TickFn};

#[cfg(test)]
pub(crate) use scheduler::ManualScheduler;
