//! Solve progress events
//!
//! Vertices report lifecycle transitions as `VertexStatus` records and
//! stream process output as `VertexLog` records. Both travel over an
//! unbounded channel to whatever renders them; the solver never blocks
//! on the observer.

pub mod logs;

use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Lifecycle record of a single vertex
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexStatus {
    pub digest: Digest,
    pub inputs: Vec<Digest>,
    pub name: String,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub cached: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl VertexStatus {
    pub fn new(digest: Digest, inputs: Vec<Digest>, name: impl Into<String>) -> Self {
        Self {
            digest,
            inputs,
            name: name.into(),
            started: None,
            completed: None,
            cached: false,
            error: String::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }
}

/// Which process stream a log chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A chunk of process output attributed to a vertex
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexLog {
    pub vertex: Option<Digest>,
    pub stream: Stream,
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_lossy")]
    pub data: Vec<u8>,
}

fn serialize_lossy<S: serde::Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

/// One event on the progress channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SolveStatus {
    Vertex(VertexStatus),
    Log(VertexLog),
}

/// Sending half of the progress channel
///
/// Cloning is cheap; a writer created with [`ProgressWriter::discard`]
/// drops every event.
#[derive(Debug, Clone, Default)]
pub struct ProgressWriter {
    tx: Option<mpsc::UnboundedSender<SolveStatus>>,
}

impl ProgressWriter {
    /// A writer with no observer
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn write(&self, status: SolveStatus) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching any more.
            let _ = tx.send(status);
        }
    }

    pub fn write_vertex(&self, status: &VertexStatus) {
        self.write(SolveStatus::Vertex(status.clone()));
    }
}

/// Receiving half of the progress channel
pub struct ProgressReader {
    rx: mpsc::UnboundedReceiver<SolveStatus>,
}

impl ProgressReader {
    /// Wait for the next event; `None` once every writer is dropped
    pub async fn recv(&mut self) -> Option<SolveStatus> {
        self.rx.recv().await
    }

    /// Drain whatever is already queued without waiting
    pub fn drain(&mut self) -> Vec<SolveStatus> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create a connected writer/reader pair
pub fn channel() -> (ProgressWriter, ProgressReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressWriter { tx: Some(tx) }, ProgressReader { rx })
}
