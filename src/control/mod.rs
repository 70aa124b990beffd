pub mod service;

pub use service::{CommandRequest, ControlService, DispatchError, Dispatched};
