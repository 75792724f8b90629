pub mod archiver;
pub mod monitor;
pub mod relay;
pub mod scheduler;
