//! Negotiation state machine
//!
//! - [`state`] - states and legal transitions
//! - [`candidates`] - remote candidate buffer-then-flush
//! - [`machine`] - the transition function applied by the call loop

pub mod candidates;
pub mod machine;
pub mod state;

pub use candidates::CandidateBuffer;
pub use machine::{Flow, Negotiator, TeardownCause};
pub use state::NegotiationState;
