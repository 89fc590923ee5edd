//! Asynchronous job processing: queue, workers, and progress streaming

pub mod job_queue;
pub mod progress;
pub mod worker;

pub use job_queue::JobQueue;
pub use progress::{JobEvent, ProgressHub};
pub use worker::IngestWorker;
