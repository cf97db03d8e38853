//! Local process worker
//!
//! Runs commands directly on the host inside a scratch sandbox
//! directory. The root reference is written to `<sandbox>/rootfs`, each
//! mount below it at its destination, and the process starts in the
//! declared working directory inside the sandbox. There is no chroot:
//! commands should use relative paths.
//!
//! Read-only mounts are not enforced; anything written under them is
//! discarded.

use crate::cache::{normalize_path, Reference, Snapshot};
use crate::config::schema::WorkerConfig;
use crate::context::Context;
use crate::error::{KilnError, KilnResult};
use crate::progress::logs::LogStream;
use crate::worker::{Meta, Mount, Worker};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 8192;

/// Worker that runs processes on the local machine
#[derive(Debug, Clone)]
pub struct LocalWorker {
    scratch_dir: Option<PathBuf>,
    inherit_path: bool,
    keep_sandbox: bool,
}

impl LocalWorker {
    /// Create a new local worker with default settings
    pub fn new() -> Self {
        Self {
            scratch_dir: None,
            inherit_path: true,
            keep_sandbox: false,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            inherit_path: config.inherit_path,
            keep_sandbox: config.keep_sandbox,
        }
    }

    /// Parent directory for sandboxes (system temp dir by default)
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    fn create_sandbox(&self) -> KilnResult<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("kiln-exec-");
        match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| KilnError::io(format!("creating {}", dir.display()), e))?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| KilnError::io("creating sandbox directory", e))
    }

    fn command(&self, meta: &Meta, cwd: &Path) -> KilnResult<Command> {
        let (program, args) = meta
            .args
            .split_first()
            .ok_or_else(|| KilnError::User("exec has no arguments".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut has_path = false;
        for pair in &meta.env {
            let (key, value) = pair.split_once('=').unwrap_or((pair.as_str(), ""));
            has_path |= key == "PATH";
            cmd.env(key, value);
        }
        if self.inherit_path && !has_path {
            if let Some(path) = std::env::var_os("PATH") {
                cmd.env("PATH", path);
            }
        }

        #[cfg(unix)]
        cmd.process_group(0);

        Ok(cmd)
    }
}

impl Default for LocalWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Location of a sandbox path on the host; `..` stops at the sandbox root
fn host_path(rootfs: &Path, dest: &str) -> PathBuf {
    rootfs.join(normalize_path(dest).trim_start_matches('/'))
}

async fn blocking<T, F>(f: F) -> KilnResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> KilnResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KilnError::Task(e.to_string()))?
}

async fn read_some<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
) -> KilnResult<usize> {
    match pipe {
        Some(pipe) => pipe
            .read(buf)
            .await
            .map_err(|e| KilnError::io("reading process output", e)),
        None => Ok(0),
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: killpg only sends a signal; the group was created by
        // `process_group(0)` at spawn so it cannot name foreign processes.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Wait for `child`, streaming its output, until it exits or `ctx` is cancelled
async fn wait_streaming(
    ctx: &Context,
    child: &mut Child,
    stdout: &mut LogStream,
    stderr: &mut LogStream,
) -> KilnResult<ExitStatus> {
    let mut out_pipe = child.stdout.take();
    let mut err_pipe = child.stderr.take();
    let mut out_buf = vec![0u8; CHUNK_SIZE];
    let mut err_buf = vec![0u8; CHUNK_SIZE];

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                kill_process_group(child);
                if let Err(e) = child.kill().await {
                    debug!("kill after cancellation: {}", e);
                }
                return Err(KilnError::Cancelled);
            }
            read = read_some(&mut out_pipe, &mut out_buf), if out_pipe.is_some() => {
                match read? {
                    0 => out_pipe = None,
                    n => stdout.write(&out_buf[..n]),
                }
            }
            read = read_some(&mut err_pipe, &mut err_buf), if err_pipe.is_some() => {
                match read? {
                    0 => err_pipe = None,
                    n => stderr.write(&err_buf[..n]),
                }
            }
            status = child.wait(), if out_pipe.is_none() && err_pipe.is_none() => {
                return status.map_err(|e| KilnError::io("waiting for process", e));
            }
        }
    }
}

#[async_trait]
impl Worker for LocalWorker {
    async fn exec(
        &self,
        ctx: &Context,
        meta: &Meta,
        root: Option<&Reference>,
        mounts: &[Mount<'_>],
        stdout: &mut LogStream,
        stderr: &mut LogStream,
    ) -> KilnResult<()> {
        ctx.check()?;

        let sandbox = self.create_sandbox()?;
        let rootfs = sandbox.path().join("rootfs");
        debug!("sandbox for {:?}: {}", meta.args, sandbox.path().display());

        let root_content = root.map(Reference::content);
        let mut layout: Vec<(PathBuf, Snapshot)> = Vec::with_capacity(mounts.len());
        for mount in mounts {
            let content = match mount.src {
                Some(src) => src.content().subtree(mount.selector)?,
                None => Snapshot::new(),
            };
            layout.push((host_path(&rootfs, mount.dest), content));
        }

        let cwd = host_path(&rootfs, &meta.cwd);
        {
            let rootfs = rootfs.clone();
            let cwd = cwd.clone();
            blocking(move || {
                match root_content {
                    Some(content) => content.write_to(&rootfs)?,
                    None => Snapshot::new().write_to(&rootfs)?,
                }
                for (dest, content) in &layout {
                    content.write_to(dest)?;
                }
                std::fs::create_dir_all(&cwd)
                    .map_err(|e| KilnError::io(format!("creating {}", cwd.display()), e))
            })
            .await?;
        }

        let mut child = self
            .command(meta, &cwd)?
            .spawn()
            .map_err(|e| KilnError::command_failed(meta.args.join(" "), e))?;
        info!("running {:?}", meta.args);

        let status = wait_streaming(ctx, &mut child, stdout, stderr).await?;
        if !status.success() {
            return Err(match status.code() {
                Some(code) => KilnError::ProcessExit { code: Some(code) },
                None => KilnError::ProcessSignaled,
            });
        }

        if let Some(Reference::Mutable(active)) = root {
            let dir = rootfs.clone();
            let mut produced = blocking(move || Snapshot::from_dir(&dir)).await?;
            for mount in mounts {
                produced.replace_subtree(mount.dest, &Snapshot::new());
            }
            active.replace(produced);
        }

        for mount in mounts.iter().filter(|m| !m.readonly) {
            if let Some(Reference::Mutable(active)) = mount.src {
                let dir = host_path(&rootfs, mount.dest);
                let produced = blocking(move || Snapshot::from_dir(&dir)).await?;
                let mut content = active.snapshot();
                content.replace_subtree(mount.selector, &produced);
                active.replace(content);
            }
        }

        if self.keep_sandbox {
            let kept = sandbox.keep();
            warn!("keeping sandbox {}", kept.display());
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
