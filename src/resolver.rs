//! Builds the parent/child adjacency from the declared `depends` lists and
//! rejects graphs the start engine could never finish.

use std::collections::VecDeque;

use crate::errors::ProcmonError;
use crate::log;
use crate::logger::LogLevel;
use crate::table::{ProcId, ProcessTable};

/// Resolve every declared dependency into parent/child handle edges.
///
/// Unknown parents and self-dependencies are configuration errors; every
/// offender is logged before the first error is returned so the operator
/// sees the whole picture. A dependency cycle is likewise rejected here,
/// because a cycle would silently stall the start engine.
pub fn link_dependencies(table: &mut ProcessTable) -> Result<(), ProcmonError> {
    let mut first_error = None;

    for child in table.ids() {
        let child_id = table.get(child).id.clone();
        let depends = table.get(child).depends.clone();

        for parent_id in depends {
            if parent_id == child_id {
                log!(
                    LogLevel::Error,
                    "Process {} cannot be a parent of itself",
                    child_id
                );
                first_error.get_or_insert(ProcmonError::Config(format!(
                    "process {} depends on itself",
                    child_id
                )));
                continue;
            }

            match table.find(&parent_id) {
                Some(parent) => {
                    table.get_mut(child).parents.push(parent);
                    table.get_mut(parent).children.push(child);
                }
                None => {
                    log!(
                        LogLevel::Error,
                        "Cannot find parent {} for process {}",
                        parent_id,
                        child_id
                    );
                    first_error.get_or_insert(ProcmonError::UnknownProcess(parent_id));
                }
            }
        }
    }

    if let Some(error) = first_error {
        return Err(error);
    }

    check_acyclic(table)
}

/// Kahn's algorithm over the parent edges. Anything left unvisited sits on
/// or behind a cycle and is named in the diagnostic.
fn check_acyclic(table: &ProcessTable) -> Result<(), ProcmonError> {
    let handles = table.ids();
    let mut indegree: Vec<usize> = handles
        .iter()
        .map(|&handle| table.get(handle).parents.len())
        .collect();

    let mut queue: VecDeque<ProcId> = handles
        .iter()
        .copied()
        .filter(|&handle| indegree[handle.0] == 0)
        .collect();

    let mut visited = 0usize;
    while let Some(handle) = queue.pop_front() {
        visited += 1;
        for &child in &table.get(handle).children {
            indegree[child.0] -= 1;
            if indegree[child.0] == 0 {
                queue.push_back(child);
            }
        }
    }

    if visited == table.len() {
        Ok(())
    } else {
        let stuck: Vec<String> = handles
            .iter()
            .filter(|&&handle| indegree[handle.0] > 0)
            .map(|&handle| table.get(handle).id.clone())
            .collect();
        Err(ProcmonError::Cycle(stuck))
    }
}
