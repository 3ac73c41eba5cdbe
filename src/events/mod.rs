//! # Workflow Events
//!
//! Every envelope a listener receives, and every envelope the engine emits, is
//! broadcast as a [`WorkflowMessageEvent`]. Observers such as the
//! execution recorder subscribe here instead of being called inline.

pub mod publisher;

pub use publisher::{
    WorkflowEventKind, WorkflowEventPublisher, WorkflowMessageEvent,
    DEFAULT_EVENT_CAPACITY,
};
