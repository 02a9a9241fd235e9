//! Per-process monitor tasks: spawn the child, detect death through the
//! lockfile's advisory write lock, honor out-of-band terminate/suspend
//! commands, and propagate restarts to dependent processes.

use std::ffi::CString;
use std::future::Future;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task;
use tokio::time::sleep;

use crate::control;
use crate::errors::ProcmonError;
use crate::lockfile::{self, Lockfile, PidStatus};
use crate::log;
use crate::logger::LogLevel;
use crate::supervisor::SupervisorCtx;
use crate::table::{ProcId, ProcState};

/// Grace period after a spawn before taking the blocking lock, giving the
/// child time to install its own write lock.
const SPAWN_GRACE: Duration = Duration::from_millis(500);
/// Poll interval while monitoring is suspended.
const SUSPEND_POLL: Duration = Duration::from_secs(1);
/// Poll interval after the kernel reports a lock deadlock.
const DEADLOCK_POLL: Duration = Duration::from_secs(1);

/// Per-iteration copy of the descriptor fields the loop needs, so no table
/// lock is held across a suspension point.
struct Snapshot {
    id: String,
    exec: String,
    monitored: bool,
    verbose: bool,
    runcount: u64,
    parent_runcount: u64,
}

/// Spawn the monitor task for a process, transitioning it to STARTED.
///
/// At most one live monitor task exists per descriptor; a request while the
/// previous task is still running is ignored.
pub async fn init_process(ctx: &Arc<SupervisorCtx>, handle: ProcId) {
    let mut table = ctx.table.write().await;
    let process = table.get_mut(handle);

    if let Some(task) = &process.task {
        if !task.is_finished() {
            log!(
                LogLevel::Trace,
                "monitor task for {} is still running",
                process.id
            );
            return;
        }
    }

    if process.verbose {
        log!(
            LogLevel::Info,
            "Creating monitor task for process {}",
            process.id
        );
    }

    process.state = ProcState::Started;
    let loop_ctx = ctx.clone();
    // Boxed so the monitor-loop future type does not contain itself through
    // the dependent-restart path.
    let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(monitor_loop(loop_ctx, handle));
    process.task = Some(tokio::spawn(fut));
}

/// Type-erased wrapper around [`init_process`] used at the one call site
/// (`restart_dependents`) that is itself reachable from `init_process`'s own
/// monitor-loop spawn, so the compiler can prove `Send` without needing to
/// structurally re-derive it through the mutual recursion.
fn init_process_boxed(ctx: Arc<SupervisorCtx>, handle: ProcId) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move { init_process(&ctx, handle).await })
}

async fn snapshot(ctx: &Arc<SupervisorCtx>, handle: ProcId) -> Snapshot {
    let table = ctx.table.read().await;
    let process = table.get(handle);
    Snapshot {
        id: process.id.clone(),
        exec: process.exec.clone(),
        monitored: process.monitored,
        verbose: process.verbose,
        runcount: process.runcount,
        parent_runcount: table.parent_runcount(handle),
    }
}

async fn monitor_loop(ctx: Arc<SupervisorCtx>, handle: ProcId) {
    loop {
        let snap = snapshot(&ctx, handle).await;

        // A run-to-exit task only runs while a parent has outpaced it.
        if !snap.monitored && snap.runcount >= snap.parent_runcount {
            return;
        }

        let mut child: Option<Child> = None;

        match lockfile::pid_status(&ctx.lock_dir, &snap.id) {
            PidStatus::Aborted => {
                log!(LogLevel::Debug, "Monitoring aborted for {}", snap.id);
                if let Err(e) = lockfile::remove(&ctx.lock_dir, &snap.id) {
                    log!(
                        LogLevel::Warn,
                        "Failed to remove lockfile for {}: {}",
                        snap.id,
                        e
                    );
                }
                return;
            }
            PidStatus::Suspended => {
                sleep(SUSPEND_POLL).await;
                continue;
            }
            PidStatus::Running(pid) => {
                // Already alive (peer supervisor, or a child that survived a
                // supervisor restart): adopt the PID instead of spawning.
                ctx.table.write().await.get_mut(handle).pid = pid;
            }
            PidStatus::Absent => {
                let delay = {
                    let mut table = ctx.table.write().await;
                    let process = table.get_mut(handle);
                    process.runcount += 1;
                    process.restart_delay
                };
                if delay > 0 {
                    sleep(Duration::from_secs(delay)).await;
                }

                match spawn_child(&ctx, &snap).await {
                    Ok(spawned) => {
                        let pid = spawned.id().map(|pid| pid as i32).unwrap_or(0);
                        ctx.table.write().await.get_mut(handle).pid = pid;
                        child = Some(spawned);
                    }
                    Err(source) => {
                        let error = ProcmonError::Spawn {
                            id: snap.id.clone(),
                            source,
                        };
                        log!(LogLevel::Error, "{}", error);
                        if !snap.monitored {
                            return;
                        }
                        sleep(SPAWN_GRACE).await;
                        continue;
                    }
                }
            }
        }

        if snap.monitored {
            restart_dependents(&ctx, handle).await;

            sleep(SPAWN_GRACE).await;

            match await_death(ctx.lock_dir.clone(), snap.id.clone()).await {
                Ok(()) => {}
                Err(ProcmonError::Lock(e)) => {
                    // Unrecoverable lock failure: abandon this task and
                    // leave the lockfile for external inspection.
                    log!(
                        LogLevel::Error,
                        "Error getting lockfile for {}: {}",
                        snap.id,
                        e
                    );
                    return;
                }
                Err(e) => {
                    log!(
                        LogLevel::Warn,
                        "Failed to start monitoring on process {}: {}",
                        snap.id,
                        e
                    );
                }
            }

            if let Some(mut spawned) = child {
                match spawned.wait().await {
                    Ok(status) => {
                        if snap.verbose {
                            log!(
                                LogLevel::Info,
                                "Process {} terminated ({})",
                                snap.id,
                                status
                            );
                        }
                    }
                    Err(e) => {
                        log!(LogLevel::Trace, "Failed to reap {}: {}", snap.id, e);
                    }
                }
            }
        } else {
            if snap.verbose {
                log!(LogLevel::Info, "{} will not be monitored", snap.id);
            }

            if let Some(mut spawned) = child {
                if let Err(e) = spawned.wait().await {
                    log!(LogLevel::Trace, "Failed to reap {}: {}", snap.id, e);
                }
                if snap.verbose {
                    log!(LogLevel::Info, "{} terminated", snap.id);
                }
            }

            restart_dependents(&ctx, handle).await;
            return;
        }
    }
}

/// Spawn the child in its own session. For monitored processes the child
/// installs its lockfile between fork and exec, so the advisory write lock
/// is owned by (and dies with) the child itself.
async fn spawn_child(ctx: &Arc<SupervisorCtx>, snap: &Snapshot) -> io::Result<Child> {
    let mut parts = snap.exec.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty exec command"))?;

    let mut command = Command::new(program);
    command.args(parts);
    command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let install = if snap.monitored {
        let path = Lockfile::path_for(&ctx.lock_dir, &snap.id);
        let path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "lockfile path contains NUL")
        })?;
        Some((path, snap.exec.clone().into_bytes()))
    } else {
        None
    };

    if snap.verbose {
        log!(LogLevel::Info, "running {}", snap.exec);
    }

    unsafe {
        command.pre_exec(move || {
            if libc::setsid() == -1 {
                // Losing the new session is tolerated; the child still execs.
                let msg = b"procmon: setsid failed\n";
                libc::write(
                    libc::STDERR_FILENO,
                    msg.as_ptr() as *const libc::c_void,
                    msg.len(),
                );
            }
            if let Some((path, exec)) = &install {
                lockfile::install_in_child(path, exec)?;
            }
            Ok(())
        });
    }

    command.spawn()
}

/// Block until the process owning the lockfile dies. Runs the blocking
/// `F_SETLKW` off the async runtime; a kernel-reported deadlock (the two
/// supervisors locking each other) degrades to once-a-second polling.
async fn await_death(dir: PathBuf, id: String) -> Result<(), ProcmonError> {
    let result = task::spawn_blocking(move || -> Result<(), ProcmonError> {
        let lockfile = Lockfile::open(&dir, &id)?;
        loop {
            match lockfile.lock_wait() {
                Ok(()) => {
                    let _ = lockfile.unlock();
                    return Ok(());
                }
                Err(e) if e.raw_os_error() == Some(libc::EDEADLK) => {
                    std::thread::sleep(DEADLOCK_POLL);
                }
                Err(e) => return Err(ProcmonError::Lock(e)),
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(e) => Err(ProcmonError::Lock(io::Error::new(io::ErrorKind::Other, e))),
    }
}

/// Restart propagation: after this process (re)starts, or after a
/// run-to-exit process finishes, each dependent that opted in via
/// `restart_on_parent_death` inherits this process's settle time as its
/// restart delay and is restarted.
pub async fn restart_dependents(ctx: &Arc<SupervisorCtx>, handle: ProcId) {
    let (wait, children) = {
        let table = ctx.table.read().await;
        let process = table.get(handle);
        (process.wait, process.children.clone())
    };

    for child in children {
        let decision = {
            let mut table = ctx.table.write().await;
            let dependent = table.get_mut(child);
            if dependent.restart_on_parent_death
                && !dependent.skip
                && dependent.state != ProcState::Init
            {
                dependent.restart_delay = wait;
                Some((dependent.id.clone(), dependent.monitored))
            } else {
                None
            }
        };

        let Some((child_id, monitored)) = decision else {
            continue;
        };

        if monitored {
            // Kill the current child; its own monitor task respawns it.
            if let Err(e) = control::restart(&ctx.lock_dir, &child_id) {
                log!(
                    LogLevel::Warn,
                    "Failed to restart dependent {}: {}",
                    child_id,
                    e
                );
            }
        } else {
            init_process_boxed(ctx.clone(), child).await;
        }
    }
}
