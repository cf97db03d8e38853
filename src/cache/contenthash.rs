//! Content checksums of reference subtrees
//!
//! The checksum covers every entry at and below the selector: relative
//! path, entry type, executable bit and a digest of the file bytes (or
//! the link target). Paths are visited in sorted order, so identical
//! trees always produce identical checksums regardless of how they
//! were built.

use crate::cache::snapshot::{normalize_path, Entry, Snapshot};
use crate::cache::ImmutableRef;
use crate::context::Context;
use crate::digest::Digest;
use crate::error::{KilnError, KilnResult};
use sha2::{Digest as _, Sha256};

/// Entries hashed between cancellation checks
const YIELD_EVERY: usize = 256;

/// Checksum of `reference` restricted to `selector`
pub async fn checksum(
    ctx: &Context,
    reference: &ImmutableRef,
    selector: &str,
) -> KilnResult<Digest> {
    if reference.is_released() {
        return Err(KilnError::invalid_reference(format!(
            "{} already released",
            reference.id()
        )));
    }
    checksum_snapshot(ctx, &reference.content(), selector).await
}

/// Checksum of a snapshot restricted to `selector`
pub async fn checksum_snapshot(
    ctx: &Context,
    snapshot: &Snapshot,
    selector: &str,
) -> KilnResult<Digest> {
    let selector = normalize_path(selector);
    let entries = snapshot.select(&selector).ok_or_else(|| KilnError::Checksum {
        selector: selector.clone(),
        reason: "no such file or directory".to_string(),
    })?;

    let mut hasher = Sha256::new();
    for (i, (path, entry)) in entries.iter().enumerate() {
        if i % YIELD_EVERY == 0 {
            ctx.check()?;
            tokio::task::yield_now().await;
        }
        write_record(&mut hasher, path, entry);
    }
    ctx.check()?;

    Ok(Digest::from_hasher(hasher))
}

fn write_record(hasher: &mut Sha256, path: &str, entry: &Entry) {
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    match entry {
        Entry::Dir => hasher.update(b"d"),
        Entry::File { data, executable } => {
            hasher.update(if *executable { b"x" } else { b"f" });
            hasher.update(Sha256::digest(data));
        }
        Entry::Symlink { target } => {
            hasher.update(b"l");
            hasher.update(target.as_bytes());
        }
    }
    hasher.update([0u8]);
}
