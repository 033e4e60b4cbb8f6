//! Remote candidate buffering
//!
//! Candidates may reach us before the remote description they belong to.
//! They are held until the description is applied and then released in
//! arrival order. Repeats (a candidate seen both as `ice_candidate` and in a
//! candidate-bearing update) are released once.

use crate::signaling::IceCandidate;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Buffer-then-flush queue for remote candidates
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    seen: HashSet<String>,
    remote_ready: bool,
}

impl CandidateBuffer {
    /// Create a buffer that holds everything until the remote description is set
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate
    ///
    /// Returns it back when it can be applied now, `None` when it was
    /// buffered or is a repeat.
    pub fn offer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if !self.seen.insert(candidate.candidate.clone()) {
            debug!(candidate = %candidate.candidate, "Ignoring repeated remote candidate");
            return None;
        }

        if self.remote_ready {
            Some(candidate)
        } else {
            debug!(pending = self.pending.len() + 1, "Buffering remote candidate");
            self.pending.push_back(candidate);
            None
        }
    }

    /// Record that the remote description is set; returns the buffered
    /// candidates in arrival order
    pub fn mark_remote_ready(&mut self) -> Vec<IceCandidate> {
        self.remote_ready = true;
        self.pending.drain(..).collect()
    }

    /// Check if the remote description has been set
    pub fn is_remote_ready(&self) -> bool {
        self.remote_ready
    }

    /// Number of candidates waiting for the remote description
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
