//! Solve command - evaluate a definition's target

use crate::cache::{CacheManager, ImmutableRef};
use crate::cli::args::SolveArgs;
use crate::config::Config;
use crate::context::Context;
use crate::definition;
use crate::error::{KilnError, KilnResult};
use crate::progress;
use crate::solver::{Solver, SolverOptions};
use crate::ui::{self, ProgressMode, SolveProgress, UiContext};
use crate::worker::local::LocalWorker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Execute the solve command
pub async fn execute(args: SolveArgs, config: &Config) -> KilnResult<()> {
    let ui_ctx = UiContext::detect();
    let mode = args
        .progress
        .or_else(|| ProgressMode::parse(&config.progress.mode))
        .unwrap_or(ProgressMode::Auto);
    let quiet = mode == ProgressMode::Json;

    let definition = definition::load(&args.file)?;
    let target = definition.resolve_target(args.target.as_deref())?;
    let target_name = definition.graph.vertex(target).name().to_string();

    if !quiet {
        ui::intro(&ui_ctx, &format!("kiln solve {}", target_name));
    }

    let cm = CacheManager::new();
    let solver = Solver::new(
        definition.graph,
        &cm,
        Arc::new(LocalWorker::from_config(&config.worker)),
        SolverOptions::from_config(&config.solver),
    );

    let (writer, reader) = progress::channel();
    let renderer = tokio::spawn(SolveProgress::new(&ui_ctx, mode).run(reader));

    let ctx = Context::new(writer);
    let result = {
        let solve = solver.solve(&ctx, target);
        tokio::pin!(solve);
        tokio::select! {
            result = &mut solve => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling solve");
                ctx.cancel();
                solve.await
            }
        }
    };
    // The renderer exits once the last writer is gone.
    drop(ctx);
    let summary = renderer
        .await
        .map_err(|e| KilnError::Task(e.to_string()))?;

    let outputs = match result {
        Ok(outputs) => outputs,
        Err(e) => {
            solver.close();
            if !quiet {
                ui::outro_error(&ui_ctx, &format!("Solve failed ({})", summary));
            }
            return Err(e);
        }
    };

    let exported = match &args.export {
        Some(dir) => export(&outputs, dir).await,
        None => Ok(Vec::new()),
    };
    for output in &outputs {
        output.release();
    }
    solver.close();
    debug!("{} cache records still live after close", cm.live_records());
    let exported = exported?;

    if !quiet {
        for (output, path) in outputs.iter().zip(&exported) {
            ui::step_ok_detail(&ui_ctx, &format!("Exported {}", output.id()), &path.display().to_string());
        }
        if exported.is_empty() {
            ui::step_info(&ui_ctx, &format!("{} produced {} output(s)", target_name, outputs.len()));
        }
        ui::outro_success(&ui_ctx, &format!("Solved {} ({})", target_name, summary));
    }

    Ok(())
}

/// Write each output into `dir`, or `dir/<index>` when there are several
async fn export(outputs: &[ImmutableRef], dir: &Path) -> KilnResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(outputs.len());
    for (index, output) in outputs.iter().enumerate() {
        let path = if outputs.len() == 1 {
            dir.to_path_buf()
        } else {
            dir.join(index.to_string())
        };
        let snapshot = output.content();
        let destination = path.clone();
        tokio::task::spawn_blocking(move || snapshot.write_to(&destination))
            .await
            .map_err(|e| KilnError::Task(e.to_string()))??;
        info!("Exported output {} to {}", index, path.display());
        written.push(path);
    }
    Ok(written)
}
