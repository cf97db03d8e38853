//! Execution worker abstraction
//!
//! A worker runs one process against a root filesystem and a set of
//! auxiliary mounts. The solver only talks to this trait; `LocalWorker`
//! is the in-tree implementation.

pub mod local;

pub use local::LocalWorker;

use crate::cache::Reference;
use crate::context::Context;
use crate::error::KilnResult;
use crate::progress::logs::LogStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Destination of the mount that becomes the process root
pub const ROOT_MOUNT: &str = "/";

/// Process metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub args: Vec<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub cwd: String,
}

/// An auxiliary mount as seen by the worker
#[derive(Debug, Clone, Copy)]
pub struct Mount<'a> {
    /// `None` mounts an empty directory
    pub src: Option<&'a Reference>,
    pub dest: &'a str,
    pub readonly: bool,
    /// Subtree of `src` to mount; empty or `/` mounts everything
    pub selector: &'a str,
}

/// A process-execution backend
///
/// `exec` blocks the calling task until the process exits. It must
/// return promptly with `KilnError::Cancelled` once `ctx` is cancelled.
/// Writable mutable sources (the root included) receive whatever the
/// process left behind.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn exec(
        &self,
        ctx: &Context,
        meta: &Meta,
        root: Option<&Reference>,
        mounts: &[Mount<'_>],
        stdout: &mut LogStream,
        stderr: &mut LogStream,
    ) -> KilnResult<()>;

    /// Human-readable worker name for display
    fn name(&self) -> &'static str;
}
