//! Source operation: leaf vertices that bring content into the graph

use crate::cache::contenthash::checksum_snapshot;
use crate::cache::{CacheManager, Reference, Snapshot};
use crate::context::Context;
use crate::digest::Digest;
use crate::error::{KilnError, KilnResult};
use crate::solver::op::Operation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

pub const SOURCE_CACHE_TYPE: &str = "source-op-v0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDef {
    /// A host directory, snapshotted when the vertex runs
    Local { path: PathBuf },
    /// Literal files keyed by path
    Inline { files: BTreeMap<String, String> },
}

#[derive(Serialize)]
struct SourceKeyRecord<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    definition: &'a SourceDef,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Digest>,
}

pub struct SourceOp {
    def: SourceDef,
    cm: CacheManager,
}

impl SourceOp {
    pub fn new(def: SourceDef, cm: CacheManager) -> Self {
        Self { def, cm }
    }

    async fn snapshot(&self) -> KilnResult<Snapshot> {
        match &self.def {
            SourceDef::Local { path } => {
                if !path.is_dir() {
                    return Err(KilnError::PathNotFound(path.display().to_string()));
                }
                let path = path.clone();
                tokio::task::spawn_blocking(move || Snapshot::from_dir(&path))
                    .await
                    .map_err(|e| KilnError::Task(e.to_string()))?
            }
            SourceDef::Inline { files } => {
                let mut snapshot = Snapshot::new();
                for (path, data) in files {
                    snapshot.insert_file(path, data.as_bytes());
                }
                Ok(snapshot)
            }
        }
    }

    fn describe(&self) -> String {
        match &self.def {
            SourceDef::Local { path } => format!("local source {}", path.display()),
            SourceDef::Inline { files } => format!("inline source ({} files)", files.len()),
        }
    }
}

#[async_trait]
impl Operation for SourceOp {
    /// Local directories have no identity besides their content, so
    /// their key includes a checksum of the whole tree.
    async fn cache_key(&self, ctx: &Context) -> KilnResult<Digest> {
        let content = match &self.def {
            SourceDef::Local { .. } => {
                let snapshot = self.snapshot().await?;
                Some(checksum_snapshot(ctx, &snapshot, "/").await?)
            }
            SourceDef::Inline { .. } => None,
        };
        Digest::from_record(&SourceKeyRecord {
            kind: SOURCE_CACHE_TYPE,
            definition: &self.def,
            content,
        })
    }

    async fn content_keys(
        &self,
        _ctx: &Context,
        _inputs: &[Vec<Digest>],
        _refs: &[Reference],
    ) -> KilnResult<Vec<Digest>> {
        Ok(Vec::new())
    }

    async fn run(&self, ctx: &Context, _inputs: &[Reference]) -> KilnResult<Vec<Reference>> {
        ctx.check()?;
        let snapshot = self.snapshot().await?;
        debug!("importing {} entries from {}", snapshot.len(), self.describe());
        Ok(vec![Reference::Immutable(self.cm.import(snapshot, self.describe()))])
    }

    fn kind(&self) -> &'static str {
        "source"
    }
}
