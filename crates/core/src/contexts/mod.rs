//! The three execution contexts: the page-bound extractor, the stateless
//! coordinator, and the UI-side orchestrator that drives both over the bus.

pub mod controller;
pub mod coordinator;
pub mod page;

pub use controller::*;
pub use coordinator::*;
pub use page::*;

use serde_json::Value;

use crate::error::Result;

/// Turns a handler result into the reply sent back over the bus.
pub(crate) fn respond(result: Result<Value>) -> Value {
    result.unwrap_or_else(|e| e.to_wire())
}
