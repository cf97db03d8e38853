//! Execution context shared by every call in a solve
//!
//! A `Context` carries the cancellation scope, the progress writer and
//! the vertex currently being evaluated. Children share the parent's
//! writer but get their own cancellation token, so cancelling a child
//! (e.g. a failed checksum fan-out) never cancels the parent.

use crate::digest::Digest;
use crate::error::{KilnError, KilnResult};
use crate::progress::ProgressWriter;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    progress: ProgressWriter,
    vertex: Option<Digest>,
}

impl Context {
    pub fn new(progress: ProgressWriter) -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress,
            vertex: None,
        }
    }

    /// A context with no progress observer
    pub fn background() -> Self {
        Self::new(ProgressWriter::discard())
    }

    /// A child scope: cancelled with the parent, cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            progress: self.progress.clone(),
            vertex: self.vertex.clone(),
        }
    }

    /// Same scope, attributed to `vertex` for progress and logs
    pub fn with_vertex(&self, vertex: Digest) -> Self {
        Self {
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
            vertex: Some(vertex),
        }
    }

    /// A child scope that cancels itself after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.child();
        let token = child.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
        child
    }

    /// Cancels this scope when dropped, ending any timeout watchdog with it
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once this scope is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(Cancelled)` if the scope has been cancelled
    pub fn check(&self) -> KilnResult<()> {
        if self.is_cancelled() {
            Err(KilnError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn progress(&self) -> &ProgressWriter {
        &self.progress
    }

    pub fn vertex(&self) -> Option<&Digest> {
        self.vertex.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(matches!(child.check(), Err(KilnError::Cancelled)));
    }

    #[test]
    fn parent_cancel_reaches_child() {
        let parent = Context::background();
        let child = parent.child().with_vertex(Digest::from_bytes(b"v"));

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.vertex().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_scope() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_cancelled());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_scope_guard_stops_the_watchdog() {
        let parent = Context::background();
        let scoped = parent.with_timeout(Duration::from_secs(3600));
        let guard = scoped.cancel_on_drop();
        assert!(!scoped.is_cancelled());

        drop(guard);
        assert!(scoped.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
