//! Build definition files
//!
//! A definition is a TOML document listing vertices in dependency order:
//!
//! ```toml
//! target = "build"
//!
//! [[vertex]]
//! name = "src"
//! source = { local = "src" }
//!
//! [[vertex]]
//! name = "build"
//! inputs = ["src"]
//! args = ["sh", "-c", "ls src > listing"]
//!
//! [[vertex.mount]]
//! dest = "/"
//! output = true
//!
//! [[vertex.mount]]
//! dest = "/src"
//! input = 0
//! readonly = true
//! ```
//!
//! `inputs` entries are `"name"` or `"name#<output>"` and may only name
//! earlier vertices. A mount's `input` indexes into the vertex's
//! `inputs`. Outputs are numbered in mount order.

use crate::error::{KilnError, KilnResult};
use crate::solver::exec::{ExecDef, MountDef};
use crate::solver::op::OpDef;
use crate::solver::source::SourceDef;
use crate::solver::vertex::{Graph, Input, VertexId};
use crate::worker::Meta;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionFile {
    target: Option<String>,
    #[serde(default, rename = "vertex")]
    vertices: Vec<VertexEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VertexEntry {
    name: String,
    #[serde(default)]
    inputs: Vec<String>,
    source: Option<SourceEntry>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<String>,
    cwd: Option<String>,
    #[serde(default, rename = "mount")]
    mounts: Vec<MountEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SourceEntry {
    Local(PathBuf),
    Inline(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MountEntry {
    dest: String,
    input: Option<usize>,
    #[serde(default)]
    readonly: bool,
    #[serde(default)]
    selector: String,
    #[serde(default)]
    output: bool,
}

/// A loaded build definition
#[derive(Debug)]
pub struct Definition {
    pub graph: Graph,
    /// Declared target, or the last vertex
    pub target: VertexId,
    names: Vec<(String, VertexId)>,
}

impl Definition {
    /// Vertex names in declaration order
    pub fn names(&self) -> impl Iterator<Item = (&str, VertexId)> {
        self.names.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn lookup(&self, name: &str) -> Option<VertexId> {
        self.names
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, id)| *id)
    }

    /// `name` if given, otherwise the declared target
    pub fn resolve_target(&self, name: Option<&str>) -> KilnResult<VertexId> {
        match name {
            Some(name) => self
                .lookup(name)
                .ok_or_else(|| KilnError::UnknownVertex(name.to_string())),
            None => Ok(self.target),
        }
    }
}

/// Load a definition file; local sources resolve relative to its directory
pub fn load(path: &Path) -> KilnResult<Definition> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&content, base, path)
}

/// Parse definition text; `origin` only labels errors
pub fn parse(content: &str, base: &Path, origin: &Path) -> KilnResult<Definition> {
    let invalid = |reason: String| KilnError::DefinitionInvalid {
        path: origin.to_path_buf(),
        reason,
    };

    let file: DefinitionFile = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;
    if file.vertices.is_empty() {
        return Err(invalid("no vertices defined".to_string()));
    }

    let mut graph = Graph::new();
    let mut by_name: HashMap<String, VertexId> = HashMap::new();
    let mut names = Vec::with_capacity(file.vertices.len());

    for entry in file.vertices {
        if by_name.contains_key(&entry.name) {
            return Err(invalid(format!("duplicate vertex name: {}", entry.name)));
        }

        let inputs = entry
            .inputs
            .iter()
            .map(|reference| {
                let (name, index) = parse_input(reference).map_err(&invalid)?;
                let vertex = by_name.get(name).copied().ok_or_else(|| {
                    invalid(format!(
                        "vertex {} uses {} before it is defined",
                        entry.name, name
                    ))
                })?;
                Ok(Input::new(vertex, index))
            })
            .collect::<KilnResult<Vec<Input>>>()?;

        let op = to_op(&entry, base, inputs.len()).map_err(&invalid)?;
        let id = graph.add_vertex(entry.name.clone(), op, inputs)?;
        debug!("definition vertex {} -> {}", entry.name, id);

        by_name.insert(entry.name.clone(), id);
        names.push((entry.name, id));
    }

    let target = match &file.target {
        Some(name) => by_name
            .get(name)
            .copied()
            .ok_or_else(|| KilnError::UnknownVertex(name.clone()))?,
        None => names
            .last()
            .map(|(_, id)| *id)
            .ok_or_else(|| invalid("no vertices defined".to_string()))?,
    };

    Ok(Definition {
        graph,
        target,
        names,
    })
}

fn parse_input(reference: &str) -> Result<(&str, usize), String> {
    match reference.rsplit_once('#') {
        Some((name, index)) => index
            .parse()
            .map(|index| (name, index))
            .map_err(|_| format!("invalid output index in input {}", reference)),
        None => Ok((reference, 0)),
    }
}

fn to_op(entry: &VertexEntry, base: &Path, input_count: usize) -> Result<OpDef, String> {
    let is_exec = !entry.args.is_empty() || !entry.mounts.is_empty();

    if let Some(source) = &entry.source {
        if is_exec {
            return Err(format!("vertex {} has both a source and a command", entry.name));
        }
        if input_count > 0 {
            return Err(format!("source vertex {} cannot have inputs", entry.name));
        }
        return Ok(OpDef::Source(match source {
            SourceEntry::Local(path) if path.is_relative() => SourceDef::Local {
                path: base.join(path),
            },
            SourceEntry::Local(path) => SourceDef::Local { path: path.clone() },
            SourceEntry::Inline(files) => SourceDef::Inline {
                files: files.clone(),
            },
        }));
    }

    if entry.args.is_empty() {
        return Err(format!("vertex {} has neither a source nor args", entry.name));
    }

    let mut outputs = 0;
    let mut mounts = Vec::with_capacity(entry.mounts.len());
    for mount in &entry.mounts {
        if let Some(input) = mount.input {
            if input >= input_count {
                return Err(format!(
                    "mount {} of vertex {} uses input {} but only {} are declared",
                    mount.dest, entry.name, input, input_count
                ));
            }
        }
        let output = mount.output.then(|| {
            outputs += 1;
            outputs - 1
        });
        mounts.push(MountDef {
            input: mount.input,
            dest: mount.dest.clone(),
            readonly: mount.readonly,
            selector: mount.selector.clone(),
            output,
        });
    }

    Ok(OpDef::Exec(ExecDef {
        meta: Meta {
            args: entry.args.clone(),
            env: entry.env.clone(),
            cwd: entry.cwd.clone().unwrap_or_else(|| "/".to_string()),
        },
        mounts,
    }))
}
