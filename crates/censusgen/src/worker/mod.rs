pub mod driver;

pub use driver::{CensusWorker, PollOutcome, WorkerSettings};
