//! Per-request processing: mapper invocation and outcome aggregation.

pub mod invoker;
pub mod outcome;

pub use invoker::{InvokerSettings, MappingInvoker};
pub use outcome::{FailureReason, OutcomeState, PortalOutcome, RequestReport};
