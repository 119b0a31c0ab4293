//! Persona agents.
//!
//! Personas differ only in their system prompt and helper templates; all
//! of them run through [`Orchestrator::invoke`](crate::Orchestrator::invoke).

mod agent;
mod persona;
mod traits;

pub use agent::Agent;
pub use persona::{HelperOperation, Persona, PersonaKind};
pub use traits::Invoker;
