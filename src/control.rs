//! Short-lived control operations. These never attach to the running
//! supervisor; everything goes through the lockfiles — reading headers,
//! rewriting the control word, and signalling the recorded PID.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;

use crate::config::RESERVED_ID_PREFIX;
use crate::errors::ProcmonError;
use crate::lockfile::{self, Lockfile, ABORT, SUSPEND};
use crate::log;
use crate::logger::LogLevel;
use crate::supervisor::{PRIMARY_ID, SECONDARY_ID};
use crate::timestamp::{current_timestamp, format_runtime};

/// Resume a suspended process: clear the control word so its monitor task
/// proceeds to spawn on its next poll.
pub fn start(dir: &Path, id: &str) -> Result<(), ProcmonError> {
    let lockfile = Lockfile::open(dir, id)?;
    lockfile.set_terminate(0)?;
    Ok(())
}

/// Kill the current child; its monitor task observes the death through the
/// released lock and respawns it.
pub fn restart(dir: &Path, id: &str) -> Result<(), ProcmonError> {
    log!(LogLevel::Info, "restarting {}", id);
    let lockfile = Lockfile::open(dir, id)?;
    let record = lockfile.read_record()?;

    if record.pid <= 0 {
        return Err(ProcmonError::UnknownProcess(id.to_string()));
    }
    kill(Pid::from_raw(record.pid), Signal::SIGKILL)?;
    Ok(())
}

/// Terminate the process and suspend its monitoring.
pub fn terminate(dir: &Path, id: &str) -> Result<(), ProcmonError> {
    terminate_command(dir, id, SUSPEND)
}

/// Terminate the process and delete its monitoring entirely; the monitor
/// task removes the lockfile and exits.
pub fn terminate_and_stop(dir: &Path, id: &str) -> Result<(), ProcmonError> {
    terminate_command(dir, id, ABORT)
}

fn terminate_command(dir: &Path, id: &str, cmd: u32) -> Result<(), ProcmonError> {
    let lockfile = Lockfile::open(dir, id)?;
    let record = lockfile.read_record()?;

    // The control word goes in before the kill so the monitor task never
    // sees the death without the instruction.
    lockfile.reset_starttime()?;
    lockfile.set_terminate(cmd)?;

    if record.pid > 0 {
        kill(Pid::from_raw(record.pid), Signal::SIGKILL)?;
    }
    Ok(())
}

/// Terminate and delete every monitored process, regular entries first so
/// they get a chance to clean up, then the two supervisor instances, then
/// both supervisor lockfiles.
pub fn shutdown_all(dir: &Path) -> Result<(), ProcmonError> {
    log!(LogLevel::Info, "shutting down all processes....");

    for name in monitored_names(dir)? {
        if name.starts_with(RESERVED_ID_PREFIX) {
            continue;
        }

        log!(LogLevel::Info, "terminating {}", name);
        if let Err(e) = terminate_and_stop(dir, &name) {
            log!(LogLevel::Error, "Failed to terminate {} ({})", name, e);
            if let Err(e) = lockfile::remove(dir, &name) {
                log!(LogLevel::Warn, "Failed to remove lockfile for {}: {}", name, e);
            }
        }
    }

    // Give processes a chance to shut down before the supervisors go.
    thread::sleep(Duration::from_secs(1));

    for id in [PRIMARY_ID, SECONDARY_ID] {
        if let Err(e) = terminate_and_stop(dir, id) {
            log!(LogLevel::Debug, "Failed to terminate {} ({})", id, e);
        }
    }

    thread::sleep(Duration::from_secs(1));

    for id in [PRIMARY_ID, SECONDARY_ID] {
        if let Err(e) = lockfile::remove(dir, id) {
            log!(LogLevel::Debug, "Failed to remove lockfile for {}: {}", id, e);
        }
    }

    Ok(())
}

/// List every monitored process from its lockfile. `format` of `json`
/// produces a structured listing; anything else falls back to the table.
pub fn list(dir: &Path, format: Option<&str>) -> Result<(), ProcmonError> {
    let json_output = match format {
        None => false,
        Some("json") => true,
        Some(other) => {
            log!(
                LogLevel::Warn,
                "unrecognized output format {}, using the table form",
                other
            );
            false
        }
    };

    let names = monitored_names(dir)?;

    if json_output {
        let mut rows = Vec::new();
        for name in &names {
            match process_row(dir, name) {
                Ok((record, running, since)) => rows.push(json!({
                    "name": name,
                    "pid": record.pid,
                    "runcount": record.runcount,
                    "since": since,
                    "state": if running { "running" } else { "stopped" },
                    "exec": record.exec,
                })),
                Err(e) => log!(LogLevel::Warn, "Failed to read entry for {}: {}", name, e),
            }
        }
        match serde_json::to_string(&rows) {
            Ok(out) => println!("{}", out),
            Err(e) => log!(LogLevel::Error, "Failed to render listing: {}", e),
        }
    } else {
        println!(
            "{:<15} {:>8} {:>8} {:>16} {:>7}   {}",
            "Process Name", "pid", "Restarts", "Since", "Status", "Command"
        );
        for name in &names {
            match process_row(dir, name) {
                Ok((record, running, since)) => println!(
                    "{:<15} {:>8} {:>8} {:>16} {:>7} : {}",
                    name,
                    record.pid,
                    record.runcount,
                    since,
                    if running { "running" } else { "stopped" },
                    record.exec
                ),
                Err(e) => log!(LogLevel::Warn, "Failed to read entry for {}: {}", name, e),
            }
        }
    }

    Ok(())
}

fn process_row(
    dir: &Path,
    name: &str,
) -> Result<(lockfile::LockRecord, bool, String), ProcmonError> {
    let lockfile = Lockfile::open(dir, name)?;
    let record = lockfile.read_record()?;
    let running = record.pid > 0 && lockfile::is_pid_active(record.pid).unwrap_or(false);
    let since = format_runtime(current_timestamp() - record.starttime);
    Ok((record, running, since))
}

/// Ids of every `procmon.<id>` entry in the lockfile directory, sorted for
/// stable output.
fn monitored_names(dir: &Path) -> Result<Vec<String>, ProcmonError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = name.strip_prefix("procmon.") {
                names.push(id.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
