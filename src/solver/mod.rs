//! Build-graph solver
//!
//! A build is a DAG of content-addressed vertices. Each vertex carries an
//! operation definition that is resolved once into an [`Operation`]; the
//! [`Solver`] walks the graph, reuses cached results where it can and
//! runs the rest.

pub mod exec;
pub mod op;
pub mod scheduler;
pub mod source;
pub mod vertex;

pub use exec::{ExecDef, ExecOp, MountDef};
pub use op::{resolve, OpDef, Operation};
pub use scheduler::{Solver, SolverOptions};
pub use source::{SourceDef, SourceOp};
pub use vertex::{Graph, Input, Vertex, VertexId};
