//! The graph engine: node lifecycle, topology mutation, render scheduling and
//! change propagation.
//!
//! All graph state lives behind one mutex, the single mutation context.
//! Backend completions re-enter through [`complete_render`], so a worker or
//! GPU queue never touches graph state directly. Dispatches produced while the
//! lock is held are queued and pumped after it is released, which also keeps
//! propagation chains off the call stack: every hop goes back through
//! admission instead of recursing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{
    AdmissionError, ConnectionError, EdgeFailure, EngineError, LoadError, RenderError,
};
use crate::graph::connections::Connections;
use crate::graph::registry::Registry;
use crate::model::frame::{Frame, Resolution};
use crate::model::modes::{Extend, Interpolation, ViewInterpolation};
use crate::model::node::{Attribute, Node, NodeKind};
use crate::model::record::{GraphRecord, NodeRecord};
use crate::render::backend::{RenderBackend, RenderHandle, RenderJob, RenderOutcome};
use crate::render::propagate;
use crate::render::queuer::{Admission, Queuer};
use crate::render::request::{Cause, RenderRequest, RenderResponse};

struct GraphState {
    registry: Registry,
    connections: Connections,
    queuer: Queuer,
    /// Scheduler tick, advanced by the host. Captured at submit time for
    /// ordering and merge tie-breaks only.
    frame_index: u64,
}

pub(crate) struct Shared {
    state: Mutex<GraphState>,
    backend: Arc<dyn RenderBackend>,
    run_queue: Mutex<VecDeque<RenderJob>>,
    pumping: AtomicBool,
}

/// Work gathered while the graph lock is held, executed after release:
/// backend dispatches plus user callbacks (completions and hooks).
#[derive(Default)]
struct Effects {
    jobs: Vec<RenderJob>,
    after: Vec<Box<dyn FnOnce() + Send>>,
}

/// Handle to a live compositing graph. Cheap to clone; all clones share the
/// same graph.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(GraphState {
                    registry: Registry::new(),
                    connections: Connections::new(),
                    queuer: Queuer::new(),
                    frame_index: 0,
                }),
                backend,
                run_queue: Mutex::new(VecDeque::new()),
                pumping: AtomicBool::new(false),
            }),
        }
    }

    // MARK: node lifecycle

    /// Create and register a node; an initial render is scheduled right away.
    pub fn create_node(&self, kind: NodeKind, name: &str) -> Uuid {
        self.with_state(|state, fx| {
            let node = Node::new(kind, name);
            let id = node.id;
            info!("Created node {name} ({kind}, {id})");
            state.registry.register(node);
            let tick = state.frame_index;
            submit_locked(state, id, RenderRequest::new(tick), fx);
            id
        })
    }

    /// Create a generator with its explicit output resolution.
    pub fn create_generator(&self, name: &str, resolution: Resolution) -> Uuid {
        self.with_state(|state, fx| {
            let mut node = Node::new(NodeKind::Generator, name);
            node.set_resolution(Some(resolution));
            let id = node.id;
            info!("Created node {name} (generator, {id}) at {resolution}");
            state.registry.register(node);
            let tick = state.frame_index;
            submit_locked(state, id, RenderRequest::new(tick), fx);
            id
        })
    }

    /// Destroy a node: drop its scheduling state, remove every edge that
    /// references it, unregister it. An in-flight render is not retracted;
    /// its completion is discarded on arrival. Idempotent.
    pub fn destroy(&self, id: Uuid) {
        self.with_state(|state, fx| {
            let abandoned = state.queuer.remove(id);
            if !abandoned.is_empty() {
                debug!(
                    "Dropping {} queued render request(s) for destroyed node {id}",
                    abandoned.len()
                );
            }
            let affected = state.connections.remove_node(id);
            for consumer in affected {
                disconnected_locked(state, consumer, fx);
            }
            if let Some(mut node) = state.registry.unregister(id) {
                node.clear_frame();
                node.bypass = true;
                node.destroyed = true;
                info!("Destroyed node {} ({}, {})", node.name, node.kind, node.id);
            }
        });
    }

    // MARK: topology

    pub fn connect(
        &self,
        consumer: Uuid,
        slot: usize,
        producer: Uuid,
    ) -> Result<(), ConnectionError> {
        self.with_state(|state, fx| {
            let outcome = state
                .connections
                .connect(&state.registry, consumer, slot, producer)?;
            if let Some(old) = outcome.replaced {
                info!("Replaced input of {consumer} at slot {slot} (was {old})");
            }
            info!("Connected {consumer} slot {slot} <- {producer}");
            connected_locked(state, consumer, fx);
            Ok(())
        })
    }

    pub fn disconnect(&self, consumer: Uuid, slot: usize) -> Result<(), ConnectionError> {
        self.with_state(|state, fx| {
            let removed = state
                .connections
                .disconnect(&state.registry, consumer, slot)?;
            if let Some(producer) = removed {
                info!("Disconnected {consumer} slot {slot} (was {producer})");
                disconnected_locked(state, consumer, fx);
            }
            Ok(())
        })
    }

    /// Replace the full input list of a multi-input node in one step.
    pub fn connect_multi(
        &self,
        consumer: Uuid,
        producers: &[Uuid],
    ) -> Result<(), ConnectionError> {
        self.with_state(|state, fx| {
            state
                .connections
                .connect_multi(&state.registry, consumer, producers)?;
            info!("Connected {} input(s) of {consumer}", producers.len());
            if producers.is_empty() {
                disconnected_locked(state, consumer, fx);
            } else {
                connected_locked(state, consumer, fx);
            }
            Ok(())
        })
    }

    // MARK: render

    /// Request a render of `id` at the current tick. Never blocks; the
    /// request may be queued, merged, or ignored (bypassed node).
    pub fn render(&self, id: Uuid) {
        self.with_state(|state, fx| {
            let tick = state.frame_index;
            submit_locked(state, id, RenderRequest::new(tick), fx);
        });
    }

    /// Like [`Engine::render`], with a completion invoked once the render
    /// that answers this request finishes (possibly merged with others).
    /// Bypassed nodes drop the request, completion included.
    pub fn render_with(
        &self,
        id: Uuid,
        completion: impl FnOnce(Result<RenderResponse, EngineError>) + Send + 'static,
    ) {
        self.with_state(|state, fx| {
            let tick = state.frame_index;
            let request = RenderRequest::with_completion(tick, Box::new(completion));
            submit_locked(state, id, request, fx);
        });
    }

    /// Advance the scheduler tick. Returns the new value.
    pub fn advance_frame(&self) -> u64 {
        self.with_state(|state, _| {
            state.frame_index += 1;
            state.frame_index
        })
    }

    pub fn frame_index(&self) -> u64 {
        self.read(|state| state.frame_index)
    }

    // MARK: node attributes

    /// Set the bypass flag. Clearing it unconditionally schedules a render;
    /// while set, the node's effective output is its first input's frame.
    pub fn set_bypass(&self, id: Uuid, bypass: bool) {
        self.with_state(|state, fx| {
            let Some(node) = state.registry.get_mut(id) else {
                return;
            };
            node.bypass = bypass;
            info!("Node {} bypass set to {bypass}", node.name);
            if !bypass {
                let tick = state.frame_index;
                submit_locked(state, id, RenderRequest::new(tick), fx);
            }
        });
    }

    pub fn set_interpolation(&self, id: Uuid, value: Interpolation) {
        self.with_state(|state, fx| {
            if let Some(node) = state.registry.get_mut(id) {
                node.sampling.interpolation = value;
                update_sampler_locked(state, id, fx);
            }
        });
    }

    pub fn set_extend(&self, id: Uuid, value: Extend) {
        self.with_state(|state, fx| {
            if let Some(node) = state.registry.get_mut(id) {
                node.sampling.extend = value;
                update_sampler_locked(state, id, fx);
            }
        });
    }

    pub fn set_mip_filter(&self, id: Uuid, value: u32) {
        self.with_state(|state, fx| {
            if let Some(node) = state.registry.get_mut(id) {
                node.sampling.mip_filter = value;
                update_sampler_locked(state, id, fx);
            }
        });
    }

    pub fn set_compare_function(&self, id: Uuid, value: u32) {
        self.with_state(|state, fx| {
            if let Some(node) = state.registry.get_mut(id) {
                node.sampling.compare_function = value;
                update_sampler_locked(state, id, fx);
            }
        });
    }

    /// View interpolation only affects how the presentation layer samples the
    /// output; no re-render is scheduled.
    pub fn set_view_interpolation(&self, id: Uuid, value: ViewInterpolation) {
        self.with_state(|state, _| {
            if let Some(node) = state.registry.get_mut(id) {
                node.sampling.view_interpolation = value;
            }
        });
    }

    /// Explicit resolution, meaningful for generators only.
    pub fn set_resolution(&self, id: Uuid, resolution: Resolution) {
        self.with_state(|state, fx| {
            let Some(node) = state.registry.get_mut(id) else {
                return;
            };
            if node.kind != NodeKind::Generator {
                debug!("Ignoring explicit resolution on {} node {id}", node.kind);
                return;
            }
            node.set_resolution(Some(resolution));
            let tick = state.frame_index;
            submit_locked(state, id, RenderRequest::new(tick), fx);
        });
    }

    /// Upsert one live property and schedule a render.
    pub fn set_attribute(&self, id: Uuid, attribute: Attribute) {
        self.with_state(|state, fx| {
            let Some(node) = state.registry.get_mut(id) else {
                return;
            };
            node.set_attribute(attribute);
            let tick = state.frame_index;
            submit_locked(state, id, RenderRequest::new(tick), fx);
        });
    }

    pub fn set_name(&self, id: Uuid, name: &str) {
        self.with_state(|state, _| {
            if let Some(node) = state.registry.get_mut(id) {
                node.name = name.to_string();
            }
        });
    }

    /// Declare (or clear) an auxiliary dependency: this node re-renders
    /// whenever `source` completes a render, without a formal edge.
    pub fn set_aux_source(&self, id: Uuid, source: Option<Uuid>) {
        self.with_state(|state, _| {
            if let Some(node) = state.registry.get_mut(id) {
                node.aux_source = source;
            }
        });
    }

    // MARK: hooks

    /// One-shot callback fired when the node's current frame next becomes
    /// available; deregisters itself with the invocation.
    pub fn on_next_frame(&self, id: Uuid, hook: impl FnOnce() + Send + 'static) {
        self.with_state(|state, _| {
            if let Some(node) = state.registry.get_mut(id) {
                node.on_next_frame(Box::new(hook));
            }
        });
    }

    /// Persistent callback fired whenever the node's input connections
    /// change (connect or disconnect).
    pub fn on_connections_changed(&self, id: Uuid, hook: impl Fn() + Send + Sync + 'static) {
        self.with_state(|state, _| {
            if let Some(node) = state.registry.get_mut(id) {
                node.set_connections_hook(Arc::new(hook));
            }
        });
    }

    // MARK: queries

    pub fn contains(&self, id: Uuid) -> bool {
        self.read(|state| state.registry.contains(id))
    }

    pub fn node_count(&self) -> usize {
        self.read(|state| state.registry.len())
    }

    pub fn node_ids(&self) -> Vec<Uuid> {
        self.read(|state| state.registry.ids())
    }

    pub fn current_frame(&self, id: Uuid) -> Option<Frame> {
        self.read(|state| state.registry.get(id).and_then(|n| n.current_frame().cloned()))
    }

    /// The node's output as a consumer sees it: the computed frame, or the
    /// first input's effective frame while bypassed.
    pub fn effective_frame(&self, id: Uuid) -> Option<Frame> {
        self.read(|state| effective_frame_of(&state.registry, &state.connections, id))
    }

    pub fn resolution(&self, id: Uuid) -> Option<Resolution> {
        self.read(|state| state.registry.get(id).and_then(|n| n.resolution()))
    }

    pub fn render_index(&self, id: Uuid) -> Option<u64> {
        self.read(|state| state.registry.get(id).map(|n| n.render_index))
    }

    pub fn is_bypassed(&self, id: Uuid) -> Option<bool> {
        self.read(|state| state.registry.get(id).map(|n| n.bypass))
    }

    pub fn did_render_frame(&self, id: Uuid) -> bool {
        self.read(|state| state.registry.get(id).is_some_and(|n| n.did_render_frame()))
    }

    pub fn is_render_in_progress(&self, id: Uuid) -> bool {
        self.read(|state| state.queuer.in_progress(id))
    }

    pub fn pending_renders(&self, id: Uuid) -> usize {
        self.read(|state| state.queuer.pending_len(id))
    }

    pub fn input_list(&self, id: Uuid) -> Vec<Option<Uuid>> {
        self.read(|state| state.connections.input_list(id).to_vec())
    }

    pub fn attributes(&self, id: Uuid) -> Vec<Attribute> {
        self.read(|state| {
            state
                .registry
                .get(id)
                .map(|n| n.attributes.clone())
                .unwrap_or_default()
        })
    }

    // MARK: persistence

    pub fn to_record(&self) -> GraphRecord {
        self.read(|state| {
            let mut nodes: Vec<NodeRecord> =
                state.registry.iter().map(NodeRecord::from_node).collect();
            nodes.sort_by_key(|r| r.id);
            GraphRecord {
                nodes,
                edges: state.connections.edge_list(),
            }
        })
    }

    pub fn save(&self) -> Result<String, serde_json::Error> {
        self.to_record().save()
    }

    pub fn load(&self, json_str: &str) -> Result<Vec<Uuid>, LoadError> {
        self.load_record(GraphRecord::load(json_str)?)
    }

    /// Decode a persisted graph into this engine.
    ///
    /// Every decoded node is registered and scheduled for an initial render
    /// after its attributes are restored. Edges are replayed afterwards;
    /// replay failures are collected into one aggregate error while the
    /// cleanly decoded nodes stay loaded.
    pub fn load_record(&self, record: GraphRecord) -> Result<Vec<Uuid>, LoadError> {
        self.with_state(|state, fx| {
            let mut ids = Vec::new();
            for node_record in record.nodes {
                let node = node_record.into_node();
                info!("Decoded node {} ({}, {})", node.name, node.kind, node.id);
                ids.push(node.id);
                state.registry.register(node);
            }
            for &id in &ids {
                let tick = state.frame_index;
                submit_locked(state, id, RenderRequest::new(tick), fx);
            }

            let mut failures = Vec::new();
            for edge in record.edges {
                match state
                    .connections
                    .connect(&state.registry, edge.consumer, edge.slot, edge.producer)
                {
                    Ok(_) => connected_locked(state, edge.consumer, fx),
                    Err(reason) => {
                        warn!(
                            "Could not replay edge {} slot {} <- {}: {reason}",
                            edge.consumer, edge.slot, edge.producer
                        );
                        failures.push(EdgeFailure {
                            consumer: edge.consumer,
                            slot: edge.slot,
                            producer: edge.producer,
                            reason,
                        });
                    }
                }
            }
            if failures.is_empty() {
                Ok(ids)
            } else {
                Err(LoadError::Edges(failures))
            }
        })
    }

    // MARK: internals

    fn with_state<R>(&self, f: impl FnOnce(&mut GraphState, &mut Effects) -> R) -> R {
        let mut fx = Effects::default();
        let result = {
            let mut state = self.shared.state.lock().expect("graph state poisoned");
            f(&mut state, &mut fx)
        };
        flush(&self.shared, fx);
        result
    }

    fn read<R>(&self, f: impl FnOnce(&GraphState) -> R) -> R {
        let state = self.shared.state.lock().expect("graph state poisoned");
        f(&state)
    }
}

/// Admission: at most one render in flight per node, everything else queues,
/// merges or bounces. Dispatches land in `fx`, never on the call stack.
fn submit_locked(state: &mut GraphState, node_id: Uuid, request: RenderRequest, fx: &mut Effects) {
    let (destroyed, bypass, name) = match state.registry.get(node_id) {
        Some(node) => (node.destroyed, node.bypass, node.name.clone()),
        None => {
            // Unregistered is indistinguishable from destroyed here.
            warn!("Render requested for unknown node {node_id}");
            fx.after.push(Box::new(move || {
                request.fail(EngineError::Admission(AdmissionError::NodeDestroyed));
            }));
            return;
        }
    };
    if destroyed {
        warn!("Render requested for destroyed node {name}");
        fx.after.push(Box::new(move || {
            request.fail(EngineError::Admission(AdmissionError::NodeDestroyed));
        }));
        return;
    }
    if bypass {
        // Bypassed nodes do not execute; output is read live from the input.
        debug!("Render request for bypassed node {name} ignored");
        return;
    }

    let frame_index = request.frame_index;
    let cause = request.caused_by;
    match state.queuer.admit(node_id, request) {
        Admission::Dispatch => {
            if let Some(cause) = cause {
                debug!(
                    "Rendering {name} after {} completed frame {}",
                    cause.node, cause.frame_index
                );
            }
            if let Some(job) = build_job_locked(state, node_id, frame_index) {
                fx.jobs.push(job);
            }
        }
        Admission::Queued => match cause {
            Some(cause) => debug!(
                "Render queued for {name}, one already in progress (after {} completed frame {})",
                cause.node, cause.frame_index
            ),
            None => debug!("Render queued for {name}, one already in progress"),
        },
        Admission::Duplicate(request) => {
            // Expected under rapid identical submits; not warning-worthy.
            debug!("Duplicate render request for {name} at frame {frame_index}");
            fx.after.push(Box::new(move || {
                request.fail(EngineError::Admission(AdmissionError::Duplicate(frame_index)));
            }));
        }
    }
}

/// Completion path, entered from [`RenderHandle::finish`]: update the node,
/// answer the waiting completions, fan out to dependents, drain the queue.
pub(crate) fn complete_render(
    shared: &Arc<Shared>,
    node_id: Uuid,
    frame_index: u64,
    result: Result<RenderOutcome, RenderError>,
) {
    let mut fx = Effects::default();
    {
        let mut state = shared.state.lock().expect("graph state poisoned");
        finish_locked(&mut state, node_id, frame_index, result, &mut fx);
    }
    flush(shared, fx);
}

fn finish_locked(
    state: &mut GraphState,
    node_id: Uuid,
    frame_index: u64,
    result: Result<RenderOutcome, RenderError>,
    fx: &mut Effects,
) {
    let Some(active) = state.queuer.take_active(node_id) else {
        // The node was destroyed while this render was in flight; discard
        // without touching state or propagating.
        debug!("Discarding render completion for {node_id} at frame {frame_index}");
        return;
    };
    if !state.registry.get(node_id).is_some_and(|n| !n.destroyed) {
        debug!("Node {node_id} gone before its render completed, discarding");
        return;
    }

    match result {
        Ok(outcome) => {
            if let Some(node) = state.registry.get_mut(node_id) {
                if outcome.resolution.is_some() {
                    node.set_resolution(outcome.resolution);
                }
                if let Some(hook) = node.set_current_frame(outcome.frame.clone()) {
                    fx.after.push(hook);
                }
                node.render_index += 1;
                debug!(
                    "Node {} rendered frame {} (render #{})",
                    node.name, active.frame_index, node.render_index
                );
            }
            let response = RenderResponse {
                frame: outcome.frame,
                frame_index: active.frame_index,
            };
            for completion in active.completions {
                let response = response.clone();
                fx.after.push(Box::new(move || completion(Ok(response))));
            }

            let tick = state.frame_index;
            let cause = Cause {
                node: node_id,
                frame_index: active.frame_index,
            };
            for dependent in propagate::dependents(&state.registry, &state.connections, node_id) {
                submit_locked(state, dependent, RenderRequest::caused_by(tick, cause), fx);
            }
        }
        Err(err) => {
            let name = state
                .registry
                .get(node_id)
                .map(|n| n.name.clone())
                .unwrap_or_default();
            error!("Render failed for node {name}: {err}");
            let failure = EngineError::Render(err);
            for completion in active.completions {
                let failure = failure.clone();
                fx.after.push(Box::new(move || completion(Err(failure))));
            }
        }
    }

    // Queue still drains after a failure; the flag is cleared in drain(),
    // right before the merged follow-up goes back through admission.
    if let Some(merged) = state.queuer.drain(node_id) {
        submit_locked(state, node_id, merged, fx);
    }
}

fn connected_locked(state: &mut GraphState, consumer: Uuid, fx: &mut Effects) {
    if !state.connections.has_inputs(consumer) {
        return;
    }
    derive_resolution_locked(state, consumer);
    if let Some(hook) = state.registry.get(consumer).and_then(|n| n.connections_hook()) {
        fx.after.push(Box::new(move || hook()));
    }
    let tick = state.frame_index;
    submit_locked(state, consumer, RenderRequest::new(tick), fx);
}

fn disconnected_locked(state: &mut GraphState, consumer: Uuid, fx: &mut Effects) {
    let Some(node) = state.registry.get_mut(consumer) else {
        return;
    };
    if node.kind != NodeKind::Generator {
        node.set_resolution(None);
    }
    node.clear_frame();
    info!("Node {} lost its input, cleared state", node.name);
    if let Some(hook) = node.connections_hook() {
        fx.after.push(Box::new(move || hook()));
    }
}

/// Seed the consumer's derived-resolution cache from its first resolved
/// input. The backend owns the real policy and overrides this with the
/// metadata of the next completed render.
fn derive_resolution_locked(state: &mut GraphState, consumer: Uuid) {
    let derived = state
        .connections
        .input_list(consumer)
        .iter()
        .flatten()
        .find_map(|&producer| state.registry.get(producer).and_then(|n| n.resolution()));
    if let Some(node) = state.registry.get_mut(consumer) {
        if node.kind != NodeKind::Generator && derived.is_some() {
            node.set_resolution(derived);
        }
    }
}

fn update_sampler_locked(state: &mut GraphState, id: Uuid, fx: &mut Effects) {
    if let Some(node) = state.registry.get(id) {
        info!(
            "New sample mode for {}: interpolate {:?}, extend {:?}",
            node.name, node.sampling.interpolation, node.sampling.extend
        );
    }
    let tick = state.frame_index;
    submit_locked(state, id, RenderRequest::new(tick), fx);
}

fn build_job_locked(state: &GraphState, node_id: Uuid, frame_index: u64) -> Option<RenderJob> {
    let node = state.registry.get(node_id)?;
    let inputs = state
        .connections
        .input_list(node_id)
        .iter()
        .map(|entry| {
            entry.and_then(|producer| {
                effective_frame_of(&state.registry, &state.connections, producer)
            })
        })
        .collect();
    Some(RenderJob {
        node: node_id,
        node_name: node.name.clone(),
        kind: node.kind,
        frame_index,
        resolution: node.resolution(),
        sampling: node.sampling,
        attributes: node.attributes.clone(),
        inputs,
    })
}

/// Walk through bypassed nodes to the frame a consumer would actually see.
/// Terminates because the graph is acyclic.
fn effective_frame_of(registry: &Registry, connections: &Connections, id: Uuid) -> Option<Frame> {
    let mut current = id;
    loop {
        let node = registry.get(current)?;
        if !node.bypass {
            return node.current_frame().cloned();
        }
        current = connections.first_input(current)?;
    }
}

fn flush(shared: &Arc<Shared>, fx: Effects) {
    for callback in fx.after {
        callback();
    }
    if !fx.jobs.is_empty() {
        shared
            .run_queue
            .lock()
            .expect("run queue poisoned")
            .extend(fx.jobs);
        pump(shared);
    }
}

/// Hand queued jobs to the backend, one pumper at a time. A backend that
/// completes synchronously re-enters here, finds the flag set, and leaves its
/// follow-up jobs for the active pumper, bounding stack depth.
fn pump(shared: &Arc<Shared>) {
    loop {
        if shared.pumping.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let job = shared
                .run_queue
                .lock()
                .expect("run queue poisoned")
                .pop_front();
            let Some(job) = job else { break };
            let handle = RenderHandle {
                shared: Arc::downgrade(shared),
                node: job.node,
                frame_index: job.frame_index,
            };
            shared.backend.execute(job, handle);
        }
        shared.pumping.store(false, Ordering::SeqCst);
        if shared
            .run_queue
            .lock()
            .expect("run queue poisoned")
            .is_empty()
        {
            return;
        }
    }
}
