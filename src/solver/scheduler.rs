//! Reference scheduler
//!
//! Evaluates a target vertex by walking its inputs depth-first:
//!
//! 1. a result stored under the vertex's structural key is reused as is;
//! 2. otherwise the inputs are evaluated concurrently and the operation
//!    is asked for content keys, any of which may hit;
//! 3. otherwise the vertex runs, bounded by the parallelism limit, and
//!    its outputs are stored under every key it has.
//!
//! Before evaluating, every vertex the solve will visit is claimed, so a
//! shared ancestor still being built on one branch is never reported as
//! cached by another. A vertex resolved from cache reports itself.
//!
//! Each vertex is evaluated at most once per solver. Results live in the
//! solver's in-memory cache until [`Solver::close`].

use crate::cache::{CacheManager, ImmutableRef, Reference, ReleaseGuard};
use crate::cache::results::ResultCache;
use crate::config::schema::SolverConfig;
use crate::context::Context;
use crate::digest::Digest;
use crate::error::{KilnError, KilnResult};
use crate::solver::op::{resolve, Operation};
use crate::solver::vertex::{Graph, Input, VertexId};
use crate::worker::Worker;
use futures_util::future::{try_join_all, BoxFuture};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Concurrent `run` calls
    pub max_parallelism: usize,
    /// Deadline for a whole solve
    pub timeout: Option<Duration>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_parallelism: default_parallelism(),
            timeout: None,
        }
    }
}

impl SolverOptions {
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            max_parallelism: match config.max_parallelism {
                0 => default_parallelism(),
                n => n,
            },
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// How a vertex was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Hit under the structural key
    Cached,
    /// Hit under a content key
    Content,
    /// Ran
    Executed,
}

#[derive(Debug, Clone)]
struct Failure {
    vertex: String,
    reason: String,
}

#[derive(Default)]
struct VertexState {
    key: OnceCell<Digest>,
    outcome: OnceCell<Result<Resolution, Failure>>,
}

#[derive(Serialize)]
struct EdgeRecord<'a> {
    key: &'a Digest,
    index: usize,
}

#[derive(Serialize)]
struct VertexKeyRecord<'a> {
    op: &'a Digest,
    inputs: Vec<EdgeRecord<'a>>,
}

pub struct Solver {
    graph: Graph,
    ops: Vec<Arc<dyn Operation>>,
    states: Vec<VertexState>,
    results: ResultCache,
    limit: Semaphore,
    options: SolverOptions,
}

impl Solver {
    pub fn new(
        graph: Graph,
        cm: &CacheManager,
        worker: Arc<dyn Worker>,
        options: SolverOptions,
    ) -> Self {
        let ops = graph
            .ids()
            .map(|id| resolve(graph.vertex(id).sys(), cm, Arc::clone(&worker)))
            .collect();
        let states = graph.ids().map(|_| VertexState::default()).collect();
        Self {
            graph,
            ops,
            states,
            results: ResultCache::new(),
            limit: Semaphore::new(options.max_parallelism.max(1)),
            options,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// How `id` was resolved, if it has been evaluated successfully
    pub fn resolution(&self, id: VertexId) -> Option<Resolution> {
        self.states[id.index()]
            .outcome
            .get()
            .and_then(|outcome| outcome.as_ref().ok().copied())
    }

    /// Evaluate `target` and return owned handles on its outputs
    pub async fn solve(&self, ctx: &Context, target: VertexId) -> KilnResult<Vec<ImmutableRef>> {
        let (ctx, _deadline) = match self.options.timeout {
            Some(timeout) => {
                let scoped = ctx.with_timeout(timeout);
                let guard = scoped.cancel_on_drop();
                (scoped, Some(guard))
            }
            None => (ctx.clone(), None),
        };

        self.claim_needed(&ctx, target).await;
        self.evaluate(&ctx, target).await?;

        let key = self.cache_key(&ctx, target).await?;
        self.results.get(&key).ok_or_else(|| {
            KilnError::Internal(format!("no result stored for {}", self.graph.vertex(target).name()))
        })
    }

    /// Cache key of a vertex: its operation key combined with its input edges' keys
    pub fn cache_key<'a>(&'a self, ctx: &'a Context, id: VertexId) -> BoxFuture<'a, KilnResult<Digest>> {
        Box::pin(async move {
            let key = self.states[id.index()]
                .key
                .get_or_try_init(|| async move {
                    let op_key = self.ops[id.index()].cache_key(ctx).await?;
                    let inputs = self.graph.vertex(id).inputs();
                    let input_keys =
                        try_join_all(inputs.iter().map(|input| self.cache_key(ctx, input.vertex))).await?;
                    Digest::from_record(&VertexKeyRecord {
                        op: &op_key,
                        inputs: inputs
                            .iter()
                            .zip(&input_keys)
                            .map(|(input, key)| EdgeRecord {
                                key,
                                index: input.index,
                            })
                            .collect(),
                    })
                })
                .await?;
            Ok(key.clone())
        })
    }

    /// Claim the target and every input behind a structural miss.
    ///
    /// Key failures stop the walk there; evaluation reports them.
    async fn claim_needed(&self, ctx: &Context, target: VertexId) {
        let mut visited = vec![false; self.graph.len()];
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            self.graph.claim(id);
            let Ok(key) = self.cache_key(ctx, id).await else {
                continue;
            };
            if !self.results.contains(&key) {
                stack.extend(self.graph.vertex(id).inputs().iter().map(|input| input.vertex));
            }
        }
    }

    fn evaluate<'a>(&'a self, ctx: &'a Context, id: VertexId) -> BoxFuture<'a, KilnResult<Resolution>> {
        Box::pin(async move {
            let outcome = self.states[id.index()]
                .outcome
                .get_or_init(|| async move {
                    self.evaluate_once(ctx, id).await.map_err(|e| match e {
                        KilnError::VertexFailed { name, reason } => Failure { vertex: name, reason },
                        e => Failure {
                            vertex: self.graph.vertex(id).name().to_string(),
                            reason: e.to_string(),
                        },
                    })
                })
                .await;
            outcome.clone().map_err(|failure| KilnError::VertexFailed {
                name: failure.vertex,
                reason: failure.reason,
            })
        })
    }

    async fn evaluate_once(&self, ctx: &Context, id: VertexId) -> KilnResult<Resolution> {
        let vertex = self.graph.vertex(id);
        let op = &self.ops[id.index()];
        let key = self.cache_key(ctx, id).await?;

        if self.results.contains(&key) {
            debug!("{}: cache hit {}", vertex.name(), key.short());
            self.graph.notify_cached(id, ctx.progress());
            return Ok(Resolution::Cached);
        }

        try_join_all(vertex.inputs().iter().map(|input| self.evaluate(ctx, input.vertex))).await?;
        let refs = self.input_refs(ctx, vertex.inputs()).await?;

        let mut edge_keys = Vec::with_capacity(vertex.inputs().len());
        for input in vertex.inputs() {
            edge_keys.push(self.edge_key(ctx, input).await?);
        }

        let vctx = ctx.with_vertex(vertex.digest().clone());
        let refined = op.content_keys(&vctx, &[edge_keys], refs.as_slice()).await?;
        for content_key in &refined {
            if let Some(outputs) = self.results.get(content_key) {
                debug!("{}: content cache hit {}", vertex.name(), content_key.short());
                self.results.insert(key, &outputs);
                release_all(&outputs);
                self.graph.notify_cached(id, ctx.progress());
                return Ok(Resolution::Content);
            }
        }

        debug!("{}: cache miss {}", vertex.name(), key.short());
        self.graph.notify_started(id, vctx.progress());
        let result = self.run_limited(&vctx, op.as_ref(), refs.as_slice()).await;

        match result {
            Ok(outputs) => {
                self.graph.notify_completed(id, false, None, vctx.progress());
                info!("{}: produced {} output(s)", vertex.name(), outputs.len());
                self.results.insert(key, &outputs);
                for content_key in refined {
                    self.results.insert(content_key, &outputs);
                }
                release_all(&outputs);
                Ok(Resolution::Executed)
            }
            Err(e) => {
                self.graph.notify_completed(id, false, Some(&e), vctx.progress());
                Err(e)
            }
        }
    }

    async fn run_limited(
        &self,
        ctx: &Context,
        op: &dyn Operation,
        refs: &[Reference],
    ) -> KilnResult<Vec<ImmutableRef>> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|e| KilnError::Task(e.to_string()))?;
        ctx.check()?;
        into_immutables(op.run(ctx, refs).await?)
    }

    /// Key of one input edge, distinguishing outputs of the same vertex
    async fn edge_key(&self, ctx: &Context, input: &Input) -> KilnResult<Digest> {
        let key = self.cache_key(ctx, input.vertex).await?;
        Digest::from_record(&EdgeRecord {
            key: &key,
            index: input.index,
        })
    }

    /// Owned handles on the outputs each input edge consumes
    async fn input_refs(&self, ctx: &Context, inputs: &[Input]) -> KilnResult<ReleaseGuard> {
        let mut refs = ReleaseGuard::new();
        for input in inputs {
            let key = self.cache_key(ctx, input.vertex).await?;
            let outputs = self.results.get(&key).ok_or_else(|| {
                KilnError::invalid_reference(format!(
                    "no result for input {}",
                    self.graph.vertex(input.vertex).name()
                ))
            })?;

            let mut selected = None;
            for (index, output) in outputs.into_iter().enumerate() {
                if index == input.index {
                    selected = Some(output);
                } else {
                    output.release();
                }
            }
            let output = selected.ok_or_else(|| {
                KilnError::invalid_reference(format!(
                    "{} has no output {}",
                    self.graph.vertex(input.vertex).name(),
                    input.index
                ))
            })?;
            refs.push(output);
        }
        Ok(refs)
    }

    /// Release every handle retained by the result cache
    pub fn close(&self) {
        self.results.clear();
    }
}

fn into_immutables(outputs: Vec<Reference>) -> KilnResult<Vec<ImmutableRef>> {
    if outputs.iter().any(|output| output.as_immutable().is_none()) {
        for output in &outputs {
            output.release();
        }
        return Err(KilnError::invalid_reference("operation returned a mutable output"));
    }
    Ok(outputs
        .into_iter()
        .filter_map(|output| match output {
            Reference::Immutable(output) => Some(output),
            Reference::Mutable(_) => None,
        })
        .collect())
}

fn release_all(outputs: &[ImmutableRef]) {
    for output in outputs {
        output.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Snapshot;
    use crate::progress::logs::LogStream;
    use crate::progress::{self, SolveStatus, VertexStatus};
    use crate::solver::exec::{ExecDef, MountDef};
    use crate::solver::op::OpDef;
    use crate::solver::source::SourceDef;
    use crate::worker::{Meta, Mount};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends the args to `/log` in a mutable root
    #[derive(Default)]
    struct AppendWorker {
        runs: AtomicUsize,
        fail_on: Option<String>,
        slow_on: Option<String>,
        last_ctx: std::sync::Mutex<Option<Context>>,
    }

    #[async_trait]
    impl Worker for AppendWorker {
        async fn exec(
            &self,
            ctx: &Context,
            meta: &Meta,
            root: Option<&Reference>,
            _mounts: &[Mount<'_>],
            _stdout: &mut LogStream,
            _stderr: &mut LogStream,
        ) -> KilnResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            *self.last_ctx.lock().unwrap() = Some(ctx.clone());
            if self.slow_on.as_deref() == meta.args.first().map(String::as_str) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.fail_on.as_deref() == meta.args.first().map(String::as_str) {
                return Err(KilnError::ProcessExit { code: Some(2) });
            }
            if let Some(Reference::Mutable(active)) = root {
                let mut content = active.snapshot();
                let mut log = content.read("/log").unwrap_or_default().to_vec();
                log.extend_from_slice(meta.args.join(" ").as_bytes());
                log.push(b'\n');
                content.insert_file("/log", log);
                active.replace(content);
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "append"
        }
    }

    fn inline(path: &str, data: &str) -> OpDef {
        let mut files = BTreeMap::new();
        files.insert(path.to_string(), data.to_string());
        OpDef::Source(SourceDef::Inline { files })
    }

    fn exec(args: &[&str], mounts: Vec<MountDef>) -> OpDef {
        OpDef::Exec(ExecDef {
            meta: Meta {
                args: args.iter().map(|a| a.to_string()).collect(),
                env: Vec::new(),
                cwd: "/".to_string(),
            },
            mounts,
        })
    }

    fn root_mount() -> MountDef {
        MountDef {
            input: Some(0),
            dest: "/".to_string(),
            readonly: false,
            selector: String::new(),
            output: Some(0),
        }
    }

    fn src_mount(input: usize) -> MountDef {
        MountDef {
            input: Some(input),
            dest: "/src".to_string(),
            readonly: true,
            selector: "/app".to_string(),
            output: None,
        }
    }

    fn options() -> SolverOptions {
        SolverOptions {
            max_parallelism: 2,
            timeout: None,
        }
    }

    fn vertex_events(events: Vec<SolveStatus>) -> Vec<VertexStatus> {
        events
            .into_iter()
            .filter_map(|event| match event {
                SolveStatus::Vertex(status) => Some(status),
                SolveStatus::Log(_) => None,
            })
            .collect()
    }

    /// base -> step1 -> step2
    fn chain() -> (Graph, VertexId) {
        let mut graph = Graph::new();
        let base = graph.add_vertex("base", inline("/seed", "s"), vec![]).unwrap();
        let step1 = graph
            .add_vertex("step1", exec(&["one"], vec![root_mount()]), vec![Input::new(base, 0)])
            .unwrap();
        let step2 = graph
            .add_vertex("step2", exec(&["two"], vec![root_mount()]), vec![Input::new(step1, 0)])
            .unwrap();
        (graph, step2)
    }

    #[tokio::test]
    async fn solves_a_chain_once() {
        let cm = CacheManager::new();
        let worker = Arc::new(AppendWorker::default());
        let (graph, target) = chain();
        let solver = Solver::new(graph, &cm, worker.clone(), options());
        let (writer, mut reader) = progress::channel();
        let ctx = Context::new(writer);

        let outputs = solver.solve(&ctx, target).await.unwrap();
        assert_eq!(outputs[0].content().read("/log"), Some(&b"one\ntwo\n"[..]));
        assert_eq!(outputs[0].content().read("/seed"), Some(&b"s"[..]));
        assert_eq!(worker.runs.load(Ordering::SeqCst), 2);
        assert_eq!(solver.resolution(target), Some(Resolution::Executed));

        let again = solver.solve(&ctx, target).await.unwrap();
        assert_eq!(again[0].id(), outputs[0].id());
        assert_eq!(worker.runs.load(Ordering::SeqCst), 2);

        let names: Vec<String> = vertex_events(reader.drain())
            .into_iter()
            .map(|status| status.name)
            .collect();
        assert_eq!(names, ["base", "base", "step1", "step1", "step2", "step2"]);

        release_all(&outputs);
        release_all(&again);
        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    #[tokio::test]
    async fn structural_hit_reports_cached_ancestors_first() {
        let cm = CacheManager::new();
        let worker = Arc::new(AppendWorker::default());
        let (mut graph, step2) = chain();
        let step3 = graph
            .add_vertex("step3", exec(&["three"], vec![root_mount()]), vec![Input::new(step2, 0)])
            .unwrap();
        let solver = Solver::new(graph, &cm, worker.clone(), options());

        let mut built = Snapshot::new();
        built.insert_file("/log", "one\ntwo\n");
        let built = cm.import(built, "step2 from an earlier solve");
        let key = solver.cache_key(&Context::background(), step2).await.unwrap();
        solver.results.insert(key, std::slice::from_ref(&built));
        built.release();

        let (writer, mut reader) = progress::channel();
        let outputs = solver.solve(&Context::new(writer), step3).await.unwrap();
        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
        assert_eq!(solver.resolution(step2), Some(Resolution::Cached));
        assert_eq!(outputs[0].content().read("/log"), Some(&b"one\ntwo\nthree\n"[..]));

        let summary: Vec<(String, bool, bool)> = vertex_events(reader.drain())
            .iter()
            .map(|e| (e.name.clone(), e.cached, e.is_completed()))
            .collect();
        assert_eq!(
            summary,
            [
                ("base".to_string(), true, true),
                ("step1".to_string(), true, true),
                ("step2".to_string(), true, true),
                ("step3".to_string(), false, false),
                ("step3".to_string(), false, true),
            ]
        );

        release_all(&outputs);
        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    #[tokio::test]
    async fn cached_target_is_reported_as_cached() {
        let cm = CacheManager::new();
        let (graph, target) = chain();
        let solver = Solver::new(graph, &cm, Arc::new(AppendWorker::default()), options());

        let done = cm.import(Snapshot::new(), "done");
        let key = solver.cache_key(&Context::background(), target).await.unwrap();
        solver.results.insert(key, std::slice::from_ref(&done));
        done.release();

        let (writer, mut reader) = progress::channel();
        release_all(&solver.solve(&Context::new(writer), target).await.unwrap());

        let events = vertex_events(reader.drain());
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.cached && e.is_completed()));
        assert_eq!(events[2].name, "step2");

        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    /// S1 -> A -> X -> T and A -> Z -> Y -> T, with Z already built
    #[tokio::test]
    async fn diamond_reports_shared_ancestor_once() {
        let cm = CacheManager::new();
        let worker = Arc::new(AppendWorker {
            slow_on: Some("s1".to_string()),
            ..AppendWorker::default()
        });
        let scratch = MountDef {
            input: None,
            dest: "/".to_string(),
            readonly: false,
            selector: String::new(),
            output: Some(0),
        };
        let side = MountDef {
            input: Some(1),
            dest: "/y".to_string(),
            readonly: false,
            selector: String::new(),
            output: None,
        };

        let mut graph = Graph::new();
        let s1 = graph.add_vertex("S1", exec(&["s1"], vec![scratch]), vec![]).unwrap();
        let a = graph
            .add_vertex("A", exec(&["a"], vec![root_mount()]), vec![Input::new(s1, 0)])
            .unwrap();
        let x = graph
            .add_vertex("X", exec(&["x"], vec![root_mount()]), vec![Input::new(a, 0)])
            .unwrap();
        let z = graph
            .add_vertex("Z", exec(&["z"], vec![root_mount()]), vec![Input::new(a, 0)])
            .unwrap();
        let y = graph
            .add_vertex("Y", exec(&["y"], vec![root_mount()]), vec![Input::new(z, 0)])
            .unwrap();
        let t = graph
            .add_vertex(
                "T",
                exec(&["t"], vec![root_mount(), side]),
                vec![Input::new(x, 0), Input::new(y, 0)],
            )
            .unwrap();
        let solver = Solver::new(graph, &cm, worker.clone(), options());

        let built = cm.import(Snapshot::new(), "Z from an earlier solve");
        let key = solver.cache_key(&Context::background(), z).await.unwrap();
        solver.results.insert(key, std::slice::from_ref(&built));
        built.release();

        let (writer, mut reader) = progress::channel();
        let outputs = solver.solve(&Context::new(writer), t).await.unwrap();
        assert_eq!(worker.runs.load(Ordering::SeqCst), 5);
        assert_eq!(solver.resolution(a), Some(Resolution::Executed));
        assert_eq!(solver.resolution(z), Some(Resolution::Cached));

        let events = vertex_events(reader.drain());
        let of = |name: &str| -> Vec<(bool, bool)> {
            events
                .iter()
                .filter(|e| e.name == name)
                .map(|e| (e.cached, e.is_completed()))
                .collect()
        };
        assert_eq!(of("A"), [(false, false), (false, true)]);
        assert_eq!(of("Z"), [(true, true)]);
        for name in ["S1", "X", "Y", "T"] {
            assert_eq!(of(name), [(false, false), (false, true)], "{name}");
        }

        release_all(&outputs);
        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    #[tokio::test]
    async fn identical_mounted_content_hits_by_content_key() {
        let cm = CacheManager::new();
        let worker = Arc::new(AppendWorker::default());
        let mut graph = Graph::new();
        let base = graph.add_vertex("base", inline("/seed", "s"), vec![]).unwrap();
        let src_a = graph.add_vertex("src-a", inline("/app/main", "same"), vec![]).unwrap();
        let mut files = BTreeMap::new();
        files.insert("/app/main".to_string(), "same".to_string());
        files.insert("/notes".to_string(), "differs".to_string());
        let src_b = graph
            .add_vertex("src-b", OpDef::Source(SourceDef::Inline { files }), vec![])
            .unwrap();

        let build = |graph: &mut Graph, name: &str, src: VertexId| {
            graph
                .add_vertex(
                    name,
                    exec(&["build"], vec![root_mount(), src_mount(1)]),
                    vec![Input::new(base, 0), Input::new(src, 0)],
                )
                .unwrap()
        };
        let build_a = build(&mut graph, "build-a", src_a);
        let build_b = build(&mut graph, "build-b", src_b);

        let solver = Solver::new(graph, &cm, worker.clone(), options());
        let ctx = Context::background();
        let a = solver.solve(&ctx, build_a).await.unwrap();
        let b = solver.solve(&ctx, build_b).await.unwrap();

        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
        assert_eq!(solver.resolution(build_b), Some(Resolution::Content));
        assert_eq!(a[0].id(), b[0].id());

        release_all(&a);
        release_all(&b);
        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    #[tokio::test]
    async fn deadline_scope_ends_with_the_solve() {
        let cm = CacheManager::new();
        let worker = Arc::new(AppendWorker::default());
        let (graph, target) = chain();
        let solver = Solver::new(
            graph,
            &cm,
            worker.clone(),
            SolverOptions {
                max_parallelism: 2,
                timeout: Some(Duration::from_secs(3600)),
            },
        );
        let ctx = Context::background();

        release_all(&solver.solve(&ctx, target).await.unwrap());
        let seen = worker.last_ctx.lock().unwrap().take().unwrap();
        assert!(seen.is_cancelled());
        assert!(!ctx.is_cancelled());
        solver.close();
    }

    #[tokio::test]
    async fn failure_is_reported_and_memoized() {
        let cm = CacheManager::new();
        let worker = Arc::new(AppendWorker {
            fail_on: Some("one".to_string()),
            ..AppendWorker::default()
        });
        let (graph, target) = chain();
        let solver = Solver::new(graph, &cm, worker.clone(), options());
        let (writer, mut reader) = progress::channel();
        let ctx = Context::new(writer);

        let err = solver.solve(&ctx, target).await.unwrap_err();
        match &err {
            KilnError::VertexFailed { name, reason } => {
                assert_eq!(name, "step1");
                assert!(reason.contains("worker failed running"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(solver.solve(&ctx, target).await.is_err());
        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);

        let failed: Vec<VertexStatus> = vertex_events(reader.drain())
            .into_iter()
            .filter(|status| !status.error.is_empty())
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "step1");

        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    #[tokio::test]
    async fn missing_output_index_is_invalid() {
        let cm = CacheManager::new();
        let mut graph = Graph::new();
        let base = graph.add_vertex("base", inline("/seed", "s"), vec![]).unwrap();
        let step = graph
            .add_vertex("step", exec(&["one"], vec![root_mount()]), vec![Input::new(base, 3)])
            .unwrap();
        let solver = Solver::new(graph, &cm, Arc::new(AppendWorker::default()), options());

        let err = solver.solve(&Context::background(), step).await.unwrap_err();
        assert!(err.to_string().contains("has no output 3"));
        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    #[tokio::test]
    async fn cache_key_ignores_names_but_not_edges() {
        let cm = CacheManager::new();
        let ctx = Context::background();
        let (graph, target) = chain();
        let solver = Solver::new(graph, &cm, Arc::new(AppendWorker::default()), options());

        let (mut other, _) = chain();
        let seed = other.add_vertex("seed2", inline("/seed", "changed"), vec![]).unwrap();
        let step = other
            .add_vertex("step2", exec(&["two"], vec![root_mount()]), vec![Input::new(seed, 0)])
            .unwrap();
        let other = Solver::new(other, &cm, Arc::new(AppendWorker::default()), options());

        let a = solver.cache_key(&ctx, target).await.unwrap();
        assert_eq!(a, solver.cache_key(&ctx, target).await.unwrap());
        assert_ne!(a, other.cache_key(&ctx, step).await.unwrap());
        assert_eq!(cm.live_records(), 0);
    }
}
