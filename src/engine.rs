//! Dependency-ordered start engine: sweeps the process table launching
//! every runnable process until a full sweep launches nothing new.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::log;
use crate::logger::LogLevel;
use crate::monitor;
use crate::supervisor::SupervisorCtx;
use crate::table::{ProcId, ProcState};

/// Start every declared process in topological waves. Because the graph is
/// validated acyclic at load time, the fixpoint is reached in at most
/// graph-depth sweeps.
pub async fn run_processes(ctx: &Arc<SupervisorCtx>) {
    loop {
        let mut progress = false;

        let handles = { ctx.table.read().await.ids() };
        for handle in handles {
            let runnable = { ctx.table.read().await.runnable(handle) };
            if runnable {
                run(ctx, handle).await;
                progress = true;
            }
        }

        if !progress {
            break;
        }
    }

    let unstarted: Vec<String> = {
        let table = ctx.table.read().await;
        table
            .iter()
            .filter(|process| process.state == ProcState::Init)
            .map(|process| process.id.clone())
            .collect()
    };
    if !unstarted.is_empty() {
        log!(
            LogLevel::Warn,
            "Processes never became runnable: {}",
            unstarted.join(", ")
        );
    }
}

/// Launch one process: spawn its monitor task, honor its settle time, then
/// mark it RUNNING so its dependents become runnable. Skipped processes are
/// marked RUNNING without being launched, so the graph around them still
/// starts.
async fn run(ctx: &Arc<SupervisorCtx>, handle: ProcId) {
    let (id, skip, wait, monitored, runcount) = {
        let table = ctx.table.read().await;
        let process = table.get(handle);
        (
            process.id.clone(),
            process.skip,
            process.wait,
            process.monitored,
            process.runcount,
        )
    };
    let parent_runcount = { ctx.table.read().await.parent_runcount(handle) };

    if !skip {
        monitor::init_process(ctx, handle).await;

        // Settle time is always honored for services; for run-to-exit tasks
        // it is skipped once they have caught up with their parents.
        if wait > 0 && (monitored || runcount < parent_runcount) {
            ctx.table.write().await.get_mut(handle).state = ProcState::Waiting;
            log!(LogLevel::Debug, "Waiting {}s for {} to settle", wait, id);
            sleep(Duration::from_secs(wait)).await;
        }
    }

    ctx.table.write().await.get_mut(handle).state = ProcState::Running;
}
