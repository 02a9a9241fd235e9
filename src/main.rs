use std::path::PathBuf;
use std::process::exit;

use clap::{CommandFactory, Parser};

use procmon::config::SupervisorSettings;
use procmon::control;
use procmon::errors::ProcmonError;
use procmon::log;
use procmon::logger::{set_log_level, LogLevel};
use procmon::supervisor::Supervisor;

/// Process monitor: starts a declared set of processes in dependency order,
/// restarts them when they die, and monitors itself through a companion
/// instance.
#[derive(Parser, Debug)]
#[command(name = "procmon")]
struct Cli {
    /// Run as the primary supervisor: load FILE and start/monitor the
    /// declared processes
    #[arg(short = 'F', value_name = "FILE")]
    primary: Option<PathBuf>,

    /// Run as the secondary supervisor, peer of the primary
    #[arg(short = 'f', value_name = "FILE")]
    secondary: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v')]
    verbose: bool,

    /// List all the monitored processes
    #[arg(short = 'l')]
    list: bool,

    /// List the monitored processes using the given format, e.g. json
    #[arg(short = 'o', value_name = "FMT")]
    output: Option<String>,

    /// Terminate and remove all monitored processes
    #[arg(short = 'x')]
    shutdown_all: bool,

    /// Start monitoring a previously stopped process
    #[arg(short = 's', value_name = "PROC")]
    start: Option<String>,

    /// Restart a process
    #[arg(short = 'r', value_name = "PROC")]
    restart: Option<String>,

    /// Kill a process and suspend its monitoring
    #[arg(short = 'k', value_name = "PROC")]
    terminate: Option<String>,

    /// Stop a process and delete its monitoring
    #[arg(short = 'd', value_name = "PROC")]
    delete: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match SupervisorSettings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };

    let verbose = cli.verbose || settings.verbose;
    if verbose {
        set_log_level(LogLevel::Debug);
    }

    let dir = settings.lock_dir.clone();

    // Short-lived control operations: act on the lockfiles and exit.
    if let Some(id) = cli.delete.as_deref() {
        finish(control::terminate_and_stop(&dir, id), "terminate", id);
    }
    if let Some(id) = cli.terminate.as_deref() {
        finish(control::terminate(&dir, id), "terminate", id);
    }
    if let Some(id) = cli.restart.as_deref() {
        finish(control::restart(&dir, id), "restart", id);
    }
    if let Some(id) = cli.start.as_deref() {
        finish(control::start(&dir, id), "start", id);
    }
    if cli.shutdown_all {
        finish(control::shutdown_all(&dir), "shut down", "all processes");
    }
    if cli.list || cli.output.is_some() {
        finish(control::list(&dir, cli.output.as_deref()), "list", "processes");
    }

    // Daemon mode. -F wins over -f: it selects the primary role in addition
    // to naming the config file.
    let (config_file, primary) = match (cli.primary, cli.secondary) {
        (Some(file), _) => (file, true),
        (None, Some(file)) => (file, false),
        (None, None) => {
            let _ = Cli::command().print_help();
            exit(0);
        }
    };

    let mut supervisor = Supervisor::new(&settings, config_file, primary, verbose);
    if let Err(e) = supervisor.run().await {
        log!(LogLevel::Error, "{}", e);
        exit(e.exit_code());
    }
}

fn finish(result: Result<(), ProcmonError>, op: &str, id: &str) -> ! {
    match result {
        Ok(()) => exit(0),
        Err(e) => {
            eprintln!("Failed to {} {} ({})", op, id, e);
            exit(e.exit_code());
        }
    }
}
