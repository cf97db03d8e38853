//! Integration tests for Kiln

const GREETING: &str = r#"
target = "build"

[[vertex]]
name = "src"
source = { inline = { "/hello.txt" = "hello" } }

[[vertex]]
name = "build"
inputs = ["src"]
args = ["sh", "-c", "cat src/hello.txt > greeting"]

[[vertex.mount]]
dest = "/"
output = true

[[vertex.mount]]
dest = "/src"
input = 0
readonly = true
"#;

mod cli_tests {
    use super::GREETING;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Kiln pointed at a config file inside `temp`
    fn kiln(temp: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.env("KILN_CONFIG", temp.join("config.toml"))
            .env_remove("RUST_LOG")
            .current_dir(temp);
        cmd
    }

    fn write_definition(temp: &Path, content: &str) {
        std::fs::write(temp.join("kiln.toml"), content).unwrap();
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build graph solver"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn config_path_honors_env() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[solver]"));
    }

    #[test]
    fn config_set_then_show() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .args(["config", "set", "solver.max_parallelism", "2"])
            .assert()
            .success();
        kiln(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_parallelism = 2"));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .args(["config", "set", "container.image", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[progress]\nmode = \"fancy\"\n").unwrap();
        kiln(temp.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn completions_generate() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn keys_json_lists_every_vertex() {
        let temp = TempDir::new().unwrap();
        write_definition(temp.path(), GREETING);
        kiln(temp.path())
            .args(["keys", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"name\": \"src\""))
            .stdout(predicate::str::contains("\"kind\": \"exec\""))
            .stdout(predicate::str::contains("\"cache_key\": \"sha256:"));
    }

    #[cfg(unix)]
    #[test]
    fn solve_exports_target_output() {
        let temp = TempDir::new().unwrap();
        write_definition(temp.path(), GREETING);
        kiln(temp.path())
            .args(["solve", "--progress", "plain", "--export", "out"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Solved build"))
            .stderr(predicate::str::contains("[DONE] build"));

        let greeting = std::fs::read_to_string(temp.path().join("out/greeting")).unwrap();
        assert_eq!(greeting, "hello");
        assert!(!temp.path().join("out/src/hello.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn solve_json_progress_is_line_delimited() {
        let temp = TempDir::new().unwrap();
        write_definition(temp.path(), GREETING);
        let output = kiln(temp.path())
            .args(["solve", "--progress", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let stdout = String::from_utf8(output.stdout).unwrap();
        let events: Vec<serde_json::Value> = stdout
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(events.iter().any(|e| e["kind"] == "vertex" && e["name"] == "build"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_fails_solve() {
        let temp = TempDir::new().unwrap();
        write_definition(
            temp.path(),
            "[[vertex]]\nname = \"broken\"\nargs = [\"sh\", \"-c\", \"exit 3\"]\n",
        );
        kiln(temp.path())
            .args(["solve", "--progress", "plain"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("vertex broken failed"));
    }

    #[test]
    fn unknown_target_fails() {
        let temp = TempDir::new().unwrap();
        write_definition(temp.path(), GREETING);
        kiln(temp.path())
            .args(["solve", "--target", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("nope"));
    }

    #[test]
    fn missing_definition_fails() {
        let temp = TempDir::new().unwrap();
        kiln(temp.path())
            .args(["solve", "absent.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("absent.toml"));
    }
}

#[cfg(unix)]
mod solver_tests {
    use super::GREETING;
    use kiln::cache::CacheManager;
    use kiln::context::Context;
    use kiln::definition;
    use kiln::progress::{self, SolveStatus};
    use kiln::solver::scheduler::Resolution;
    use kiln::solver::{Solver, SolverOptions};
    use kiln::worker::LocalWorker;
    use std::path::Path;
    use std::sync::Arc;

    #[tokio::test]
    async fn solve_through_local_worker() {
        let def = definition::parse(GREETING, Path::new("."), Path::new("kiln.toml")).unwrap();
        let target = def.target;
        let src = def.lookup("src").unwrap();

        let cm = CacheManager::new();
        let solver = Solver::new(
            def.graph,
            &cm,
            Arc::new(LocalWorker::new()),
            SolverOptions::default(),
        );

        let (writer, mut reader) = progress::channel();
        let ctx = Context::new(writer);
        let outputs = solver.solve(&ctx, target).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].content().read("/greeting"), Some(&b"hello"[..]));
        assert_eq!(solver.resolution(target), Some(Resolution::Executed));
        assert_eq!(solver.resolution(src), Some(Resolution::Executed));

        let again = solver.solve(&ctx, target).await.unwrap();
        assert_eq!(again[0].content().read("/greeting"), Some(&b"hello"[..]));

        drop(ctx);
        let completed: Vec<String> = reader
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                SolveStatus::Vertex(status) if status.is_completed() => Some(status.name),
                _ => None,
            })
            .collect();
        assert_eq!(completed.first().map(String::as_str), Some("src"));
        assert!(completed.iter().any(|name| name == "build"));

        for output in outputs.iter().chain(&again) {
            output.release();
        }
        solver.close();
        assert_eq!(cm.live_records(), 0);
    }
}

mod fake_worker_tests {
    use async_trait::async_trait;
    use kiln::cache::{CacheManager, Reference};
    use kiln::context::Context;
    use kiln::progress::logs::LogStream;
    use kiln::solver::exec::{ExecDef, MountDef};
    use kiln::solver::scheduler::Resolution;
    use kiln::solver::{Graph, Input, OpDef, SourceDef, Solver, SolverOptions};
    use kiln::worker::{Meta, Mount, Worker};
    use kiln::KilnResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes `/marker` into a mutable root and counts invocations
    #[derive(Default)]
    struct CountingWorker {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn exec(
            &self,
            ctx: &Context,
            meta: &Meta,
            root: Option<&Reference>,
            mounts: &[Mount<'_>],
            stdout: &mut LogStream,
            _stderr: &mut LogStream,
        ) -> KilnResult<()> {
            ctx.check()?;
            self.runs.fetch_add(1, Ordering::SeqCst);
            stdout.write(format!("{} mount(s)\n", mounts.len()).as_bytes());
            if let Some(root) = root.and_then(Reference::as_mutable) {
                let mut content = root.snapshot();
                content.insert_file("/marker", meta.args.join(" ").into_bytes());
                root.replace(content);
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn source(files: &[(&str, &str)]) -> OpDef {
        OpDef::Source(SourceDef::Inline {
            files: files
                .iter()
                .map(|(path, data)| (path.to_string(), data.to_string()))
                .collect(),
        })
    }

    fn compile() -> OpDef {
        OpDef::Exec(ExecDef {
            meta: Meta {
                args: vec!["compile".to_string()],
                env: vec![],
                cwd: "/".to_string(),
            },
            mounts: vec![
                MountDef {
                    input: None,
                    dest: "/".to_string(),
                    readonly: false,
                    selector: String::new(),
                    output: Some(0),
                },
                MountDef {
                    input: Some(0),
                    dest: "/src".to_string(),
                    readonly: true,
                    selector: "/app".to_string(),
                    output: None,
                },
            ],
        })
    }

    #[tokio::test]
    async fn identical_mounted_content_reuses_result() {
        let mut graph = Graph::new();
        let src_a = graph
            .add_vertex("src-a", source(&[("/app/main", "same")]), vec![])
            .unwrap();
        let src_b = graph
            .add_vertex(
                "src-b",
                source(&[("/app/main", "same"), ("/README", "differs")]),
                vec![],
            )
            .unwrap();
        let build_a = graph
            .add_vertex("build-a", compile(), vec![Input::new(src_a, 0)])
            .unwrap();
        let build_b = graph
            .add_vertex("build-b", compile(), vec![Input::new(src_b, 0)])
            .unwrap();

        let cm = CacheManager::new();
        let worker = Arc::new(CountingWorker::default());
        let solver = Solver::new(graph, &cm, worker.clone(), SolverOptions::default());
        let ctx = Context::background();

        let first = solver.solve(&ctx, build_a).await.unwrap();
        let second = solver.solve(&ctx, build_b).await.unwrap();

        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
        assert_eq!(solver.resolution(build_a), Some(Resolution::Executed));
        assert_eq!(solver.resolution(build_b), Some(Resolution::Content));
        assert_eq!(first[0].content().read("/marker"), Some(&b"compile"[..]));
        assert_eq!(first[0].id(), second[0].id());

        for output in first.iter().chain(&second) {
            output.release();
        }
        solver.close();
        assert_eq!(cm.live_records(), 0);
    }

    #[tokio::test]
    async fn concurrent_solves_share_ancestors() {
        let mut graph = Graph::new();
        let base = graph.add_vertex("base", source(&[("/app/main", "x")]), vec![]).unwrap();
        let left = graph
            .add_vertex("left", compile(), vec![Input::new(base, 0)])
            .unwrap();
        let right = graph
            .add_vertex(
                "right",
                OpDef::Exec(ExecDef {
                    meta: Meta {
                        args: vec!["other".to_string()],
                        env: vec![],
                        cwd: "/".to_string(),
                    },
                    mounts: vec![MountDef {
                        input: Some(0),
                        dest: "/".to_string(),
                        readonly: false,
                        selector: String::new(),
                        output: Some(0),
                    }],
                }),
                vec![Input::new(base, 0)],
            )
            .unwrap();

        let cm = CacheManager::new();
        let worker = Arc::new(CountingWorker::default());
        let solver = Solver::new(graph, &cm, worker.clone(), SolverOptions::default());
        let (writer, mut reader) = kiln::progress::channel();
        let ctx = Context::new(writer);

        let (l, r) = tokio::join!(solver.solve(&ctx, left), solver.solve(&ctx, right));
        let (l, r) = (l.unwrap(), r.unwrap());
        assert_eq!(worker.runs.load(Ordering::SeqCst), 2);

        drop(ctx);
        let base_events = reader
            .drain()
            .into_iter()
            .filter(|event| matches!(event, kiln::progress::SolveStatus::Vertex(s) if s.name == "base"))
            .count();
        assert_eq!(base_events, 2);

        for output in l.iter().chain(&r) {
            output.release();
        }
        solver.close();
    }
}
