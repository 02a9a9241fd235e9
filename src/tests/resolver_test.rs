#[cfg(test)]
mod tests {
    use crate::config::ProcessEntry;
    use crate::errors::ProcmonError;
    use crate::resolver::link_dependencies;
    use crate::table::{ProcState, Process, ProcessTable};

    fn entry(id: &str, depends: &[&str]) -> ProcessEntry {
        ProcessEntry {
            id: id.to_string(),
            exec: "sleep 1".to_string(),
            wait: 0,
            monitored: true,
            verbose: false,
            skip: false,
            restart_on_parent_death: false,
            depends: depends.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn table(entries: Vec<ProcessEntry>) -> ProcessTable {
        let mut table = ProcessTable::new();
        for e in entries {
            table.insert(Process::from_entry(e)).expect("insert failed");
        }
        table
    }

    #[test]
    fn test_edges_are_inverse_of_each_other() {
        let mut t = table(vec![
            entry("a", &[]),
            entry("b", &["a"]),
            entry("c", &["a", "b"]),
        ]);
        link_dependencies(&mut t).expect("link failed");

        let a = t.find("a").unwrap();
        let b = t.find("b").unwrap();
        let c = t.find("c").unwrap();

        assert!(t.get(a).parents.is_empty());
        assert_eq!(t.get(a).children, vec![b, c]);
        assert_eq!(t.get(b).parents, vec![a]);
        assert_eq!(t.get(b).children, vec![c]);
        assert_eq!(t.get(c).parents, vec![a, b]);
        assert!(t.get(c).children.is_empty());
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let mut t = table(vec![entry("a", &["nosuch"])]);
        let result = link_dependencies(&mut t);
        assert!(matches!(result, Err(ProcmonError::UnknownProcess(id)) if id == "nosuch"));
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let mut t = table(vec![entry("a", &["a"])]);
        let result = link_dependencies(&mut t);
        assert!(matches!(result, Err(ProcmonError::Config(_))));
    }

    #[test]
    fn test_cycle_is_rejected_with_members() {
        let mut t = table(vec![
            entry("a", &["c"]),
            entry("b", &["a"]),
            entry("c", &["b"]),
            entry("root", &[]),
        ]);
        let result = link_dependencies(&mut t);
        match result {
            Err(ProcmonError::Cycle(members)) => {
                assert!(members.contains(&"a".to_string()));
                assert!(members.contains(&"b".to_string()));
                assert!(members.contains(&"c".to_string()));
                assert!(!members.contains(&"root".to_string()));
            }
            other => panic!("expected cycle error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_runnable_follows_parent_states() {
        let mut t = table(vec![entry("a", &[]), entry("b", &["a"])]);
        link_dependencies(&mut t).expect("link failed");

        let a = t.find("a").unwrap();
        let b = t.find("b").unwrap();

        assert!(t.runnable(a));
        assert!(!t.runnable(b), "parent not RUNNING yet");

        t.get_mut(a).state = ProcState::Running;
        assert!(!t.runnable(a), "already launched");
        assert!(t.runnable(b));

        t.get_mut(b).state = ProcState::Running;
        assert!(!t.runnable(b));
    }

    #[test]
    fn test_parent_runcount_is_max_over_parents() {
        let mut t = table(vec![
            entry("a", &[]),
            entry("b", &[]),
            entry("c", &["a", "b"]),
        ]);
        link_dependencies(&mut t).expect("link failed");

        let a = t.find("a").unwrap();
        let b = t.find("b").unwrap();
        let c = t.find("c").unwrap();

        assert_eq!(t.parent_runcount(c), 0);
        t.get_mut(a).runcount = 2;
        t.get_mut(b).runcount = 5;
        assert_eq!(t.parent_runcount(c), 5);
        assert_eq!(t.parent_runcount(a), 0, "roots have no parent runcount");
    }
}
