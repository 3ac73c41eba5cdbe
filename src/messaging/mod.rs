//! # Messaging Module
//!
//! Broker abstraction used to move workflow envelopes between step consumers,
//! an in-memory transport, and the circuit breaker protected wrapper that every
//! production send goes through.

pub mod broker;
pub mod errors;
pub mod in_memory;
pub mod resilient;

pub use broker::MessageBroker;
pub use errors::MessagingError;
pub use in_memory::InMemoryMessageBroker;
pub use resilient::ResilientMessageBroker;
