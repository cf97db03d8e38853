//! Operation capability and definitions
//!
//! Every vertex carries an `OpDef`. The solver resolves it once into a
//! boxed [`Operation`] that knows how to compute its cache keys and how
//! to run.

use crate::cache::{CacheManager, Reference};
use crate::context::Context;
use crate::digest::Digest;
use crate::error::KilnResult;
use crate::solver::exec::{ExecDef, ExecOp};
use crate::solver::source::{SourceDef, SourceOp};
use crate::worker::Worker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Closed set of operation definitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpDef {
    Exec(ExecDef),
    Source(SourceDef),
}

impl OpDef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exec(_) => "exec",
            Self::Source(_) => "source",
        }
    }
}

/// A resolved operation
#[async_trait]
pub trait Operation: Send + Sync {
    /// Digest of the declared definition only; never reads content
    async fn cache_key(&self, ctx: &Context) -> KilnResult<Digest>;

    /// Keys refined by the content of resolved inputs.
    ///
    /// `inputs` holds one candidate per entry, each listing the cache
    /// keys of this operation's inputs. Returns one key per candidate, or
    /// nothing when content refinement does not apply.
    async fn content_keys(
        &self,
        ctx: &Context,
        inputs: &[Vec<Digest>],
        refs: &[Reference],
    ) -> KilnResult<Vec<Digest>>;

    /// Produce output references; the caller owns them
    async fn run(&self, ctx: &Context, inputs: &[Reference]) -> KilnResult<Vec<Reference>>;

    fn kind(&self) -> &'static str;
}

/// Resolve a definition into its operation
pub fn resolve(def: &OpDef, cm: &CacheManager, worker: Arc<dyn Worker>) -> Arc<dyn Operation> {
    match def {
        OpDef::Exec(def) => Arc::new(ExecOp::new(def.clone(), cm.clone(), worker)),
        OpDef::Source(def) => Arc::new(SourceOp::new(def.clone(), cm.clone())),
    }
}
