//! Vertex arena and progress notification
//!
//! Vertices live in a [`Graph`] and refer to their inputs by [`VertexId`].
//! A vertex may only be added after all of its inputs, so the graph is
//! acyclic by construction and ids are a topological order.
//!
//! Notification follows a per-vertex state machine:
//!
//! ```text
//! pending --notify_started--> started --notify_completed--> completed
//!    \____________________notify_completed_______________/
//! ```
//!
//! Before a vertex reports `started`, every input that never started is
//! reported as completed and cached, ancestors first. A vertex that an
//! evaluation has [claimed](Graph::claim) is skipped by that marking; its
//! owner reports it. `completed` is terminal. Each vertex guards its
//! status with its own lock. Locks are only ever taken from a descendant
//! towards its ancestors.

use crate::digest::Digest;
use crate::error::{KilnError, KilnResult};
use crate::progress::{ProgressWriter, VertexStatus};
use crate::solver::op::OpDef;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Index of a vertex within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

impl VertexId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An input edge: output `index` of `vertex`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input {
    pub vertex: VertexId,
    pub index: usize,
}

impl Input {
    pub fn new(vertex: VertexId, index: usize) -> Self {
        Self { vertex, index }
    }
}

#[derive(Serialize)]
struct InputRecord<'a> {
    digest: &'a Digest,
    index: usize,
}

#[derive(Serialize)]
struct VertexRecord<'a> {
    op: &'a OpDef,
    inputs: Vec<InputRecord<'a>>,
}

#[derive(Debug)]
struct Tracking {
    status: VertexStatus,
    claimed: bool,
}

#[derive(Debug)]
pub struct Vertex {
    digest: Digest,
    name: String,
    op: OpDef,
    inputs: Vec<Input>,
    tracking: Mutex<Tracking>,
}

impl Vertex {
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operation definition this vertex was built from
    pub fn sys(&self) -> &OpDef {
        &self.op
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// A copy of the current progress record
    pub fn status(&self) -> VertexStatus {
        self.lock().status.clone()
    }

    /// Whether an evaluation currently owns this vertex's reporting
    pub fn is_claimed(&self) -> bool {
        self.lock().claimed
    }

    fn lock(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Visit {
    Enter(VertexId),
    Exit(VertexId),
}

/// Append-only vertex arena
#[derive(Debug, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    by_digest: HashMap<Digest, VertexId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex whose inputs are already in the graph.
    ///
    /// The digest covers the operation definition and the inputs' digests
    /// but not the name, so an identical vertex collapses onto the one
    /// already present and its id is returned.
    pub fn add_vertex(
        &mut self,
        name: impl Into<String>,
        op: OpDef,
        inputs: Vec<Input>,
    ) -> KilnResult<VertexId> {
        let mut input_records = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let vertex = self.vertices.get(input.vertex.0).ok_or_else(|| {
                KilnError::invalid_reference(format!("input vertex {} does not exist", input.vertex))
            })?;
            input_records.push(InputRecord {
                digest: &vertex.digest,
                index: input.index,
            });
        }
        let digest = Digest::from_record(&VertexRecord {
            op: &op,
            inputs: input_records,
        })?;

        if let Some(&existing) = self.by_digest.get(&digest) {
            return Ok(existing);
        }

        let name = name.into();
        let input_digests = inputs
            .iter()
            .map(|input| self.vertices[input.vertex.0].digest.clone())
            .collect();
        let id = VertexId(self.vertices.len());
        debug!("vertex {} {} = {}", id, name, digest.short());

        self.vertices.push(Vertex {
            tracking: Mutex::new(Tracking {
                status: VertexStatus::new(digest.clone(), input_digests, name.clone()),
                claimed: false,
            }),
            digest: digest.clone(),
            name,
            op,
            inputs,
        });
        self.by_digest.insert(digest, id);
        Ok(id)
    }

    /// # Panics
    ///
    /// Panics if `id` was not handed out by this graph.
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    pub fn find(&self, digest: &Digest) -> Option<VertexId> {
        self.by_digest.get(digest).copied()
    }

    pub fn find_by_name(&self, name: &str) -> Option<VertexId> {
        self.vertices
            .iter()
            .position(|vertex| vertex.name == name)
            .map(VertexId)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// All ids in insertion (topological) order
    pub fn ids(&self) -> impl Iterator<Item = VertexId> {
        (0..self.vertices.len()).map(VertexId)
    }

    /// Reserve a vertex's reporting for the evaluation about to run it.
    ///
    /// A claimed vertex is never marked cached on behalf of a dependent.
    /// No-op once the vertex has started.
    pub fn claim(&self, id: VertexId) {
        let mut state = self.vertex(id).lock();
        if state.status.started.is_none() {
            state.claimed = true;
        }
    }

    /// Report a vertex as started, completing un-started ancestors first.
    ///
    /// No-op for a vertex that already completed.
    pub fn notify_started(&self, id: VertexId, writer: &ProgressWriter) {
        let vertex = self.vertex(id);
        let mut state = vertex.lock();
        if state.status.is_completed() {
            debug!("{} already completed, not restarting", vertex.name);
            return;
        }
        self.mark_cached(vertex.inputs.iter().map(|input| input.vertex), writer);

        state.claimed = false;
        state.status.started = Some(Utc::now());
        writer.write_vertex(&state.status);
    }

    /// Report a vertex as completed, backfilling `started` if needed
    pub fn notify_completed(
        &self,
        id: VertexId,
        cached: bool,
        err: Option<&KilnError>,
        writer: &ProgressWriter,
    ) {
        let mut state = self.vertex(id).lock();
        state.claimed = false;
        complete(&mut state.status, cached, err, writer);
    }

    /// Report a vertex that was resolved from cache, releasing its claim.
    ///
    /// No-op for a vertex that already started; otherwise its un-started,
    /// unclaimed ancestors are completed first, then the vertex itself.
    pub fn notify_cached(&self, id: VertexId, writer: &ProgressWriter) {
        self.vertex(id).lock().claimed = false;
        self.mark_cached(std::iter::once(id), writer);
    }

    /// Complete every un-started vertex in the closure of `roots` as
    /// cached, in post-order.
    fn mark_cached(&self, roots: impl DoubleEndedIterator<Item = VertexId>, writer: &ProgressWriter) {
        let mut stack: Vec<Visit> = roots.rev().map(Visit::Enter).collect();

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    let vertex = self.vertex(id);
                    if !vertex.lock().is_unreported() {
                        continue;
                    }
                    stack.push(Visit::Exit(id));
                    stack.extend(
                        vertex
                            .inputs
                            .iter()
                            .rev()
                            .map(|input| Visit::Enter(input.vertex)),
                    );
                }
                Visit::Exit(id) => {
                    let mut state = self.vertex(id).lock();
                    if state.is_unreported() {
                        complete(&mut state.status, true, None, writer);
                    }
                }
            }
        }
    }
}

impl Tracking {
    /// Neither started nor owned by an evaluation
    fn is_unreported(&self) -> bool {
        self.status.started.is_none() && !self.claimed
    }
}

fn complete(
    status: &mut VertexStatus,
    cached: bool,
    err: Option<&KilnError>,
    writer: &ProgressWriter,
) {
    if status.is_completed() {
        return;
    }
    let now = Utc::now();
    if status.started.is_none() {
        status.started = Some(now);
    }
    status.completed = Some(now);
    status.cached = cached;
    if let Some(err) = err {
        status.error = err.to_string();
    }
    writer.write_vertex(status);
}
