//! In-memory content trees
//!
//! A `Snapshot` is what a reference points at: an ordered map from
//! normalized absolute paths (`/app/main`) to entries. The root `/` is
//! implicit and never stored.

use crate::error::{KilnError, KilnResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// A single filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File { data: Vec<u8>, executable: bool },
    Dir,
    Symlink { target: String },
}

/// Normalize a path to absolute, slash-separated form without `.`/`..`
///
/// `""`, `"."` and `"/"` all normalize to `"/"`. `..` never escapes the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

/// Join a normalized base with a normalized relative remainder
fn rebase(base: &str, rel: &str) -> String {
    if base == "/" {
        rel.to_string()
    } else if rel == "/" {
        base.to_string()
    } else {
        format!("{}{}", base, rel)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a regular file, creating parent directories
    pub fn insert_file(&mut self, path: &str, data: impl Into<Vec<u8>>) -> &mut Self {
        self.insert(
            path,
            Entry::File {
                data: data.into(),
                executable: false,
            },
        )
    }

    pub fn insert_executable(&mut self, path: &str, data: impl Into<Vec<u8>>) -> &mut Self {
        self.insert(
            path,
            Entry::File {
                data: data.into(),
                executable: true,
            },
        )
    }

    pub fn insert_dir(&mut self, path: &str) -> &mut Self {
        self.insert(path, Entry::Dir)
    }

    pub fn insert_symlink(&mut self, path: &str, target: &str) -> &mut Self {
        self.insert(
            path,
            Entry::Symlink {
                target: target.to_string(),
            },
        )
    }

    fn insert(&mut self, path: &str, entry: Entry) -> &mut Self {
        let path = normalize_path(path);
        if path == "/" {
            return self;
        }
        let mut parent = parent_of(&path);
        while let Some(dir) = parent {
            self.entries.insert(dir.to_string(), Entry::Dir);
            parent = parent_of(dir);
        }
        self.entries.insert(path, entry);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(&normalize_path(path))
    }

    /// Whether `path` exists; the root always does
    pub fn contains(&self, path: &str) -> bool {
        let path = normalize_path(path);
        path == "/" || self.entries.contains_key(&path)
    }

    /// Read a file's contents
    pub fn read(&self, path: &str) -> Option<&[u8]> {
        match self.get(path) {
            Some(Entry::File { data, .. }) => Some(data),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    /// Entries strictly below the normalized directory `dir`, in order
    fn below<'a>(&'a self, dir: &str) -> impl Iterator<Item = (&'a String, &'a Entry)> + 'a {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.entries
            .range(prefix.clone()..)
            .take_while(move |(path, _)| path.starts_with(&prefix))
    }

    /// Entries at and below `selector`, with paths relative to it.
    ///
    /// The selector itself is reported as `/`. Returns `None` when the
    /// selector does not exist.
    pub fn select(&self, selector: &str) -> Option<Vec<(String, &Entry)>> {
        let selector = normalize_path(selector);
        let mut out = Vec::new();
        if selector != "/" {
            let entry = self.entries.get(&selector)?;
            out.push(("/".to_string(), entry));
        }
        let strip = if selector == "/" { 0 } else { selector.len() };
        for (path, entry) in self.below(&selector) {
            out.push((path[strip..].to_string(), entry));
        }
        Some(out)
    }

    /// The tree rooted at `selector`, re-rooted to `/`.
    ///
    /// A file selector yields a tree holding just that file under its
    /// own name.
    pub fn subtree(&self, selector: &str) -> KilnResult<Snapshot> {
        let selector = normalize_path(selector);
        let selected = self
            .select(&selector)
            .ok_or_else(|| KilnError::PathNotFound(selector.clone()))?;

        let mut out = Snapshot::new();
        for (rel, entry) in selected {
            if rel == "/" {
                if !matches!(entry, Entry::Dir) {
                    let name = selector.rsplit('/').next().unwrap_or_default();
                    out.insert(name, entry.clone());
                }
                continue;
            }
            out.entries.insert(rel, entry.clone());
        }
        Ok(out)
    }

    /// Replace everything below `dir` with the contents of `other`
    pub fn replace_subtree(&mut self, dir: &str, other: &Snapshot) {
        let dir = normalize_path(dir);
        let stale: Vec<String> = self.below(&dir).map(|(path, _)| path.clone()).collect();
        for path in stale {
            self.entries.remove(&path);
        }
        if dir != "/" {
            self.insert_dir(&dir);
        }
        for (rel, entry) in other.iter() {
            self.entries.insert(rebase(&dir, rel), entry.clone());
        }
    }

    /// Import a host directory tree
    pub fn from_dir(root: &Path) -> KilnResult<Snapshot> {
        let mut snapshot = Snapshot::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| KilnError::Internal(e.to_string()))?;
            let path = normalize_path(&rel.to_string_lossy());
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let target = fs::read_link(entry.path()).map_err(|e| {
                    KilnError::io(format!("reading link {}", entry.path().display()), e)
                })?;
                snapshot.insert_symlink(&path, &target.to_string_lossy());
            } else if file_type.is_dir() {
                snapshot.insert_dir(&path);
            } else {
                let data = fs::read(entry.path()).map_err(|e| {
                    KilnError::io(format!("reading {}", entry.path().display()), e)
                })?;
                if is_executable(entry.path())? {
                    snapshot.insert_executable(&path, data);
                } else {
                    snapshot.insert_file(&path, data);
                }
            }
        }

        Ok(snapshot)
    }

    /// Materialize the tree under a host directory
    pub fn write_to(&self, root: &Path) -> KilnResult<()> {
        fs::create_dir_all(root)
            .map_err(|e| KilnError::io(format!("creating {}", root.display()), e))?;

        for (path, entry) in &self.entries {
            let target = root.join(path.trim_start_matches('/'));
            match entry {
                Entry::Dir => fs::create_dir_all(&target)
                    .map_err(|e| KilnError::io(format!("creating {}", target.display()), e))?,
                Entry::File { data, executable } => {
                    fs::write(&target, data)
                        .map_err(|e| KilnError::io(format!("writing {}", target.display()), e))?;
                    if *executable {
                        set_executable(&target)?;
                    }
                }
                Entry::Symlink { target: link } => symlink(link, &target)?,
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> KilnResult<bool> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path)
        .map_err(|e| KilnError::io(format!("reading metadata of {}", path.display()), e))?;
    Ok(meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> KilnResult<bool> {
    Ok(false)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> KilnResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| KilnError::io(format!("setting permissions on {}", path.display()), e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> KilnResult<()> {
    Ok(())
}

#[cfg(unix)]
fn symlink(link: &str, at: &Path) -> KilnResult<()> {
    std::os::unix::fs::symlink(link, at)
        .map_err(|e| KilnError::io(format!("creating symlink {}", at.display()), e))
}

#[cfg(not(unix))]
fn symlink(_link: &str, at: &Path) -> KilnResult<()> {
    Err(KilnError::Internal(format!(
        "symlinks are not supported here: {}",
        at.display()
    )))
}
