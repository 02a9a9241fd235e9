//! In-memory registry of declared processes.
//!
//! Descriptors live in an arena owned by [`ProcessTable`]; parent/child
//! edges store [`ProcId`] handles rather than references, so the
//! bidirectional dependency graph never turns into an ownership cycle.

use std::collections::HashMap;
use std::fmt;

use tokio::task::JoinHandle;

use crate::config::ProcessEntry;
use crate::errors::ProcmonError;

/// Handle into the process arena. Only minted by [`ProcessTable::insert`],
/// and the arena never shrinks, so a handle is valid for the table's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcId(pub(crate) usize);

/// Operating state of a declared process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Init,
    Started,
    Waiting,
    Running,
    Terminated,
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcState::Init => "INIT",
            ProcState::Started => "STARTED",
            ProcState::Waiting => "WAITING",
            ProcState::Running => "RUNNING",
            ProcState::Terminated => "TERMINATED",
        };
        write!(f, "{}", name)
    }
}

/// One declared process plus its runtime state.
#[derive(Debug)]
pub struct Process {
    pub id: String,
    pub exec: String,
    pub wait: u64,
    /// Seconds to hold off before respawning after a detected death. A
    /// parent propagates its own `wait` into this field when it restarts.
    pub restart_delay: u64,
    pub monitored: bool,
    pub verbose: bool,
    pub skip: bool,
    pub restart_on_parent_death: bool,
    /// Declared parent ids, resolved into `parents` once the whole table is
    /// known.
    pub depends: Vec<String>,
    pub state: ProcState,
    /// PID of the most recent child; 0 if never started.
    pub pid: i32,
    /// Number of times this process has been launched.
    pub runcount: u64,
    pub parents: Vec<ProcId>,
    pub children: Vec<ProcId>,
    /// Handle of the monitor task that owns this process, if one is live.
    pub task: Option<JoinHandle<()>>,
}

impl Process {
    pub fn from_entry(entry: ProcessEntry) -> Process {
        Process {
            id: entry.id,
            exec: entry.exec,
            wait: entry.wait,
            restart_delay: 0,
            monitored: entry.monitored,
            verbose: entry.verbose,
            skip: entry.skip,
            restart_on_parent_death: entry.restart_on_parent_death,
            depends: entry.depends,
            state: ProcState::Init,
            pid: 0,
            runcount: 0,
            parents: Vec::new(),
            children: Vec::new(),
            task: None,
        }
    }

    /// Descriptor for a process the supervisor synthesizes itself (the peer
    /// supervisor instance); always monitored, never part of the graph.
    pub fn internal(id: &str, exec: String) -> Process {
        Process {
            id: id.to_string(),
            exec,
            wait: 0,
            restart_delay: 0,
            monitored: true,
            verbose: false,
            skip: false,
            restart_on_parent_death: false,
            depends: Vec::new(),
            state: ProcState::Init,
            pid: 0,
            runcount: 0,
            parents: Vec::new(),
            children: Vec::new(),
            task: None,
        }
    }
}

/// Arena of process descriptors with O(1) lookup by id and
/// declaration-order iteration.
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: Vec<Process>,
    index: HashMap<String, ProcId>,
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable::default()
    }

    /// Adds a descriptor; duplicate ids are a configuration error.
    pub fn insert(&mut self, process: Process) -> Result<ProcId, ProcmonError> {
        if self.index.contains_key(&process.id) {
            return Err(ProcmonError::Config(format!(
                "duplicate process id {}",
                process.id
            )));
        }

        let handle = ProcId(self.procs.len());
        self.index.insert(process.id.clone(), handle);
        self.procs.push(process);
        Ok(handle)
    }

    pub fn find(&self, id: &str) -> Option<ProcId> {
        self.index.get(id).copied()
    }

    pub fn get(&self, handle: ProcId) -> &Process {
        &self.procs[handle.0]
    }

    pub fn get_mut(&mut self, handle: ProcId) -> &mut Process {
        &mut self.procs[handle.0]
    }

    /// Handles in declaration order.
    pub fn ids(&self) -> Vec<ProcId> {
        (0..self.procs.len()).map(ProcId).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.iter()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Largest runcount among the process's parents.
    pub fn parent_runcount(&self, handle: ProcId) -> u64 {
        self.get(handle)
            .parents
            .iter()
            .map(|&parent| self.get(parent).runcount)
            .max()
            .unwrap_or(0)
    }

    /// A process is runnable iff it has not been launched yet and every
    /// parent has reached RUNNING.
    pub fn runnable(&self, handle: ProcId) -> bool {
        let process = self.get(handle);
        process.state == ProcState::Init
            && process
                .parents
                .iter()
                .all(|&parent| self.get(parent).state == ProcState::Running)
    }

    /// Aborts any live monitor tasks and marks every descriptor TERMINATED.
    pub fn shutdown(&mut self) {
        for process in &mut self.procs {
            if let Some(task) = process.task.take() {
                task.abort();
            }
            process.state = ProcState::Terminated;
        }
    }
}
