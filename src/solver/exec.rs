//! Process execution operation
//!
//! Runs one command through the worker with a root filesystem and a set
//! of mounts taken from the vertex inputs.
//!
//! Caching happens in two tiers. The structural key hashes the
//! definition alone. Content keys additionally hash the bytes seen
//! through read-only, non-root mounts, so two steps whose upstream
//! differs but whose mounted content is identical share results. Inputs
//! reached only through the root or a writable mount contribute their
//! structural key instead.

use crate::cache::contenthash::checksum_snapshot;
use crate::cache::{normalize_path, CacheManager, ImmutableRef, Reference, ReleaseGuard};
use crate::context::Context;
use crate::digest::Digest;
use crate::error::{KilnError, KilnResult};
use crate::progress::logs::new_log_streams;
use crate::solver::op::Operation;
use crate::worker::{Meta, Mount, Worker, ROOT_MOUNT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub const EXEC_CACHE_TYPE: &str = "exec-op-v0";

/// Declared process execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecDef {
    pub meta: Meta,
    pub mounts: Vec<MountDef>,
}

/// A mount declaration
///
/// `input: None` mounts an empty directory; `output: None` discards
/// whatever the process leaves in the mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountDef {
    pub input: Option<usize>,
    pub dest: String,
    pub readonly: bool,
    pub selector: String,
    pub output: Option<usize>,
}

impl MountDef {
    fn is_root(&self) -> bool {
        self.dest == ROOT_MOUNT
    }
}

#[derive(Serialize)]
struct CacheKeyRecord<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    definition: &'a ExecDef,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentKeyRecord<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    content_checksums: &'a [Digest],
    skipped_input_keys: Vec<&'a Digest>,
    definition: &'a ExecDef,
}

/// Where a mount's content comes from during `run`
enum MountSource {
    Empty,
    Input(usize),
    Output(usize),
}

pub struct ExecOp {
    def: ExecDef,
    cm: CacheManager,
    worker: Arc<dyn Worker>,
}

impl ExecOp {
    pub fn new(def: ExecDef, cm: CacheManager, worker: Arc<dyn Worker>) -> Self {
        Self { def, cm, worker }
    }

    pub fn definition(&self) -> &ExecDef {
        &self.def
    }

    /// Split mounts into content-hashed `(input, selector)` pairs, ordered
    /// by input then selector, and skipped input indices in declaration
    /// order.
    fn classify_mounts(&self) -> (Vec<(usize, String)>, Vec<usize>) {
        let mut selectors = BTreeSet::new();
        let mut skipped = Vec::new();
        for mount in &self.def.mounts {
            let Some(input) = mount.input else {
                continue;
            };
            if !mount.is_root() && mount.readonly {
                selectors.insert((input, normalize_path(&mount.selector)));
            } else {
                skipped.push(input);
            }
        }
        (selectors.into_iter().collect(), skipped)
    }

    fn describe(&self, dest: &str) -> String {
        format!("mount {} from exec {}", dest, self.def.meta.args.join(" "))
    }
}

fn immutable_input(inputs: &[Reference], index: usize) -> KilnResult<&ImmutableRef> {
    inputs
        .get(index)
        .ok_or_else(|| KilnError::invalid_reference(format!("missing input {}", index)))?
        .as_immutable()
        .ok_or_else(|| {
            KilnError::invalid_reference(format!("input {} is not an immutable reference", index))
        })
}

/// Checksum every `(input, selector)` pair concurrently.
///
/// The tasks share one child scope; the first failure cancels the rest
/// and is returned once all of them have finished.
async fn checksum_all(
    ctx: &Context,
    refs: &[Reference],
    pairs: &[(usize, String)],
) -> KilnResult<Vec<Digest>> {
    let scope = ctx.child();
    let mut tasks = JoinSet::new();

    for (slot, (index, selector)) in pairs.iter().enumerate() {
        let input = immutable_input(refs, *index)?;
        if input.is_released() {
            return Err(KilnError::invalid_reference(format!(
                "input {} already released",
                index
            )));
        }
        let content = input.content();
        let task_scope = scope.clone();
        let selector = selector.clone();
        tasks.spawn(async move {
            checksum_snapshot(&task_scope, &content, &selector)
                .await
                .map(|digest| (slot, digest))
        });
    }

    let mut checksums: Vec<Option<Digest>> = vec![None; pairs.len()];
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| KilnError::Task(e.to_string()))
            .and_then(|result| result);
        match outcome {
            Ok((slot, digest)) => checksums[slot] = Some(digest),
            Err(e) => {
                if first_error.is_none() {
                    scope.cancel();
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    checksums
        .into_iter()
        .map(|digest| digest.ok_or_else(|| KilnError::Internal("missing checksum".to_string())))
        .collect()
}

#[async_trait]
impl Operation for ExecOp {
    async fn cache_key(&self, _ctx: &Context) -> KilnResult<Digest> {
        Digest::from_record(&CacheKeyRecord {
            kind: EXEC_CACHE_TYPE,
            definition: &self.def,
        })
    }

    async fn content_keys(
        &self,
        ctx: &Context,
        inputs: &[Vec<Digest>],
        refs: &[Reference],
    ) -> KilnResult<Vec<Digest>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let (pairs, skipped) = self.classify_mounts();
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let checksums = checksum_all(ctx, refs, &pairs).await?;
        debug!("content checksums for {:?}: {}", self.def.meta.args, pairs.len());

        let mut keys = Vec::with_capacity(inputs.len());
        for candidate in inputs {
            let skipped_input_keys = skipped
                .iter()
                .map(|&index| {
                    candidate.get(index).ok_or_else(|| {
                        KilnError::invalid_reference(format!("no cache key for input {}", index))
                    })
                })
                .collect::<KilnResult<Vec<&Digest>>>()?;

            keys.push(Digest::from_record(&ContentKeyRecord {
                kind: EXEC_CACHE_TYPE,
                content_checksums: &checksums,
                skipped_input_keys,
                definition: &self.def,
            })?);
        }
        Ok(keys)
    }

    async fn run(&self, ctx: &Context, inputs: &[Reference]) -> KilnResult<Vec<Reference>> {
        let mut pending = ReleaseGuard::new();
        let mut sources = Vec::with_capacity(self.def.mounts.len());

        for mount in &self.def.mounts {
            let input = mount
                .input
                .map(|index| immutable_input(inputs, index))
                .transpose()?;
            let mut source = match mount.input {
                Some(index) => MountSource::Input(index),
                None => MountSource::Empty,
            };

            if mount.output.is_some() {
                match input {
                    Some(shared) if mount.readonly && !mount.is_root() => {
                        pending.push(shared.clone_ref());
                    }
                    _ => {
                        let active = self.cm.new_mutable(input, self.describe(&mount.dest))?;
                        source = MountSource::Output(pending.len());
                        pending.push(active);
                    }
                }
            }
            sources.push(source);
        }

        let mut root = None;
        let mut mounts = Vec::with_capacity(self.def.mounts.len());
        for (mount, source) in self.def.mounts.iter().zip(&sources) {
            let src = match *source {
                MountSource::Empty => None,
                MountSource::Input(index) => inputs.get(index),
                MountSource::Output(slot) => pending.get(slot),
            };
            if mount.is_root() {
                root = src;
            } else {
                mounts.push(Mount {
                    src,
                    dest: &mount.dest,
                    readonly: mount.readonly,
                    selector: &mount.selector,
                });
            }
        }
        mounts.sort_by(|a, b| a.dest.cmp(b.dest));

        let meta = &self.def.meta;
        info!("exec {:?} on {} worker", meta.args, self.worker.name());

        let (mut stdout, mut stderr) = new_log_streams(ctx);
        let result = self
            .worker
            .exec(ctx, meta, root, &mounts, &mut stdout, &mut stderr)
            .await;
        stdout.close();
        stderr.close();
        result.map_err(|e| KilnError::worker_failed(&meta.args, e))?;

        let mut committed = ReleaseGuard::new();
        for output in pending.as_slice() {
            match output {
                Reference::Mutable(active) => {
                    let frozen = active
                        .commit()
                        .map_err(|e| KilnError::commit(active.id(), e))?;
                    committed.push(frozen);
                }
                Reference::Immutable(shared) => committed.push(shared.clone_ref()),
            }
        }
        drop(pending);

        Ok(committed.into_inner())
    }

    fn kind(&self) -> &'static str {
        "exec"
    }
}
