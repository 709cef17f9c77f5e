//! Per-node render admission.
//!
//! At most one render is in flight per node. Requests arriving while one is in
//! flight are queued, and on completion the whole queue collapses into a
//! single merged follow-up request: representative tick is the minimum queued
//! `frame_index`, and every queued completion is carried over so none is
//! dropped.

use std::collections::HashMap;

use uuid::Uuid;

use crate::render::request::RenderRequest;

/// Admission decision for one submitted request.
#[derive(Debug)]
pub enum Admission {
    /// Nothing in flight: the request is now the active render, dispatch it.
    Dispatch,
    /// A render is in flight: the request waits in the pending queue.
    Queued,
    /// A request for the same tick is already pending. The request is handed
    /// back so its completions can be failed.
    Duplicate(RenderRequest),
}

#[derive(Default)]
struct QueueState {
    in_progress: bool,
    active: Option<RenderRequest>,
    pending: Vec<RenderRequest>,
}

#[derive(Default)]
pub struct Queuer {
    states: HashMap<Uuid, QueueState>,
}

impl Queuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, node: Uuid, request: RenderRequest) -> Admission {
        let state = self.states.entry(node).or_default();
        if state.in_progress {
            if state
                .pending
                .iter()
                .any(|r| r.frame_index == request.frame_index)
            {
                return Admission::Duplicate(request);
            }
            state.pending.push(request);
            return Admission::Queued;
        }
        state.in_progress = true;
        state.active = Some(request);
        Admission::Dispatch
    }

    /// Take the request the current in-flight render was admitted for.
    pub fn take_active(&mut self, node: Uuid) -> Option<RenderRequest> {
        self.states.get_mut(&node).and_then(|s| s.active.take())
    }

    /// Close out the in-flight render and collapse the pending queue.
    ///
    /// Returns the merged follow-up request, if any. `in_progress` is cleared
    /// here in both cases — immediately before the caller re-submits the
    /// merged request, so it passes through admission again.
    pub fn drain(&mut self, node: Uuid) -> Option<RenderRequest> {
        let state = self.states.get_mut(&node)?;
        state.in_progress = false;
        if state.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut state.pending);
        let frame_index = pending.iter().map(|r| r.frame_index).min().unwrap_or(0);
        let mut merged = RenderRequest::new(frame_index);
        for request in pending {
            merged.completions.extend(request.completions);
        }
        Some(merged)
    }

    /// Drop all scheduling state for a node (on destruction). Returns the
    /// abandoned requests so the caller can decide what to tell them.
    pub fn remove(&mut self, node: Uuid) -> Vec<RenderRequest> {
        let Some(state) = self.states.remove(&node) else {
            return Vec::new();
        };
        let mut abandoned = state.pending;
        if let Some(active) = state.active {
            abandoned.insert(0, active);
        }
        abandoned
    }

    pub fn in_progress(&self, node: Uuid) -> bool {
        self.states.get(&node).is_some_and(|s| s.in_progress)
    }

    pub fn pending_len(&self, node: Uuid) -> usize {
        self.states.get(&node).map_or(0, |s| s.pending.len())
    }
}
