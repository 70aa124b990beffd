pub mod rolling;
pub mod service;
pub mod source;
pub mod validator;

pub use service::{CycleOutcome, SensorService};
pub use source::{HttpSource, ReadingSource};
