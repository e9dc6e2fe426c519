//! Command messaging: envelopes, the handler registry and request correlation.

pub mod correlator;
pub mod envelope;
pub mod registry;

pub use correlator::RequestCorrelator;
pub use envelope::{Command, CommandEnvelope, CorrelationId};
pub use registry::{CommandFault, CommandHandler, CommandRegistry, ExecutionContext, handler_fn};
