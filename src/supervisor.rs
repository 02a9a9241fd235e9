//! The long-lived supervisor instance: owns the shared context, creates its
//! own liveness lockfile, spawns and watches the companion instance, and
//! (on the primary) processes the config file and starts the declared
//! processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;

use crate::config::{MonitorConfig, SupervisorSettings, RESERVED_ID_PREFIX};
use crate::engine;
use crate::errors::ProcmonError;
use crate::lockfile::Lockfile;
use crate::log;
use crate::logger::LogLevel;
use crate::monitor;
use crate::resolver;
use crate::table::{Process, ProcessTable};

/// Reserved lockfile id of the primary supervisor instance.
pub const PRIMARY_ID: &str = "procmon1";
/// Reserved lockfile id of the secondary supervisor instance.
pub const SECONDARY_ID: &str = "procmon2";

/// Shared state every component works against. Passed explicitly to each
/// operation; there is no hidden global.
#[derive(Debug)]
pub struct SupervisorCtx {
    pub table: RwLock<ProcessTable>,
    pub lock_dir: PathBuf,
    pub verbose: bool,
}

impl SupervisorCtx {
    pub fn new(lock_dir: PathBuf, verbose: bool) -> Arc<SupervisorCtx> {
        Arc::new(SupervisorCtx {
            table: RwLock::new(ProcessTable::new()),
            lock_dir,
            verbose,
        })
    }
}

/// One supervisor instance, primary or secondary.
pub struct Supervisor {
    ctx: Arc<SupervisorCtx>,
    primary: bool,
    config_file: PathBuf,
    argv0: String,
    /// Our own lockfile handle. Held for the life of the process so the
    /// write lock on it stays ours; the peer blocks on that lock to detect
    /// our death.
    own_lock: Option<Lockfile>,
}

impl Supervisor {
    pub fn new(
        settings: &SupervisorSettings,
        config_file: PathBuf,
        primary: bool,
        verbose: bool,
    ) -> Supervisor {
        let argv0 = std::env::args()
            .next()
            .unwrap_or_else(|| "procmon".to_string());

        Supervisor {
            ctx: SupervisorCtx::new(settings.lock_dir.clone(), verbose),
            primary,
            config_file,
            argv0,
            own_lock: None,
        }
    }

    pub fn ctx(&self) -> &Arc<SupervisorCtx> {
        &self.ctx
    }

    /// Runs the supervisor. Does not return in normal operation; the exit
    /// paths are the fatal-signal handler and out-of-band termination via
    /// this instance's own lockfile.
    pub async fn run(&mut self) -> Result<(), ProcmonError> {
        setup_termination_handler();
        self.make_own_lock();
        if self.own_lock.is_none() {
            log!(
                LogLevel::Warn,
                "running without a liveness lock; the peer cannot watch this instance"
            );
        }
        self.monitor_peer().await;

        if self.primary {
            log!(LogLevel::Debug, "Processing the config file");
            let config = MonitorConfig::load(&self.config_file)?;
            {
                let mut table = self.ctx.table.write().await;
                for entry in config.processes {
                    table.insert(Process::from_entry(entry))?;
                }
                resolver::link_dependencies(&mut table)?;
            }
            self.display_config().await;
            engine::run_processes(&self.ctx).await;
        }

        // The monitor tasks do all the work from here on.
        loop {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }

    fn own_id(&self) -> &'static str {
        if self.primary {
            PRIMARY_ID
        } else {
            SECONDARY_ID
        }
    }

    fn peer_id(&self) -> &'static str {
        if self.primary {
            SECONDARY_ID
        } else {
            PRIMARY_ID
        }
    }

    /// Command line for a supervisor instance of the given role, shown in
    /// the `list` Command column and used to respawn the peer.
    fn command_line(&self, primary: bool) -> String {
        let flag = if primary { "-F" } else { "-f" };
        if self.ctx.verbose {
            format!("{} -v {} {}", self.argv0, flag, self.config_file.display())
        } else {
            format!("{} {} {}", self.argv0, flag, self.config_file.display())
        }
    }

    /// Create (or adopt and bump) this instance's own lockfile and keep the
    /// write lock for the life of the process.
    fn make_own_lock(&mut self) {
        let exec = self.command_line(self.primary);
        let pid = std::process::id() as i32;

        log!(LogLevel::Debug, "Creating lock for {}", self.own_id());
        match Lockfile::make(&self.ctx.lock_dir, self.own_id(), pid, &exec) {
            Ok(lockfile) => self.own_lock = Some(lockfile),
            Err(e) => {
                log!(
                    LogLevel::Warn,
                    "Failed to make lock for {}: {}",
                    self.own_id(),
                    e
                );
            }
        }
    }

    /// Start an ordinary monitor task watching the companion supervisor.
    /// If the peer is already alive its PID is adopted from its lockfile;
    /// otherwise it is spawned with the opposite role flag and the same
    /// config path.
    async fn monitor_peer(&self) {
        let exec = self.command_line(!self.primary);
        let peer = Process::internal(self.peer_id(), exec);

        let handle = {
            let mut table = self.ctx.table.write().await;
            match table.insert(peer) {
                Ok(handle) => handle,
                Err(e) => {
                    log!(LogLevel::Error, "Failed to register peer supervisor: {}", e);
                    return;
                }
            }
        };

        monitor::init_process(&self.ctx, handle).await;
    }

    /// Verbose dump of the loaded process graph, in declaration order.
    async fn display_config(&self) {
        let table = self.ctx.table.read().await;
        for process in table.iter() {
            if process.id.starts_with(RESERVED_ID_PREFIX) {
                continue;
            }

            let parents: Vec<&str> = process
                .parents
                .iter()
                .map(|&parent| table.get(parent).id.as_str())
                .collect();
            let children: Vec<&str> = process
                .children
                .iter()
                .map(|&child| table.get(child).id.as_str())
                .collect();

            log!(LogLevel::Debug, "process: {}", process.id);
            log!(LogLevel::Debug, "\tstate: {}", process.state);
            log!(LogLevel::Debug, "\texec: {}", process.exec);
            if process.wait > 0 {
                log!(LogLevel::Debug, "\twait: {}", process.wait);
            }
            log!(
                LogLevel::Debug,
                "\tmonitored: {}",
                if process.monitored { "yes" } else { "no" }
            );
            log!(LogLevel::Debug, "\tDepends on: [{}]", parents.join(","));
            log!(
                LogLevel::Debug,
                "\tDependency of: [{}]",
                children.join(",")
            );
        }
    }
}

/// SIGTERM/SIGINT handler: log and exit. No graceful teardown of children
/// is attempted here; the peer supervisor restarts this instance.
fn setup_termination_handler() {
    tokio::spawn(async {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                log!(LogLevel::Error, "Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(e) => {
                log!(LogLevel::Error, "Failed to install SIGINT handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }

        log!(LogLevel::Error, "Abnormal termination of process monitor");
        std::process::exit(1);
    });
}
