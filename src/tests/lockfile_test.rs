#[cfg(test)]
mod tests {
    use crate::lockfile::{self, Lockfile, PidStatus, ABORT, SUSPEND};
    use crate::timestamp::current_timestamp;

    use tempfile::TempDir;

    // A PID that cannot correspond to a live process (beyond pid_max).
    const DEAD_PID: i32 = 999_999_999;

    #[test]
    fn test_create_and_read_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let before = current_timestamp();

        let lockfile =
            Lockfile::create(dir.path(), "svc", 4242, "sleep 3600").expect("Failed to create");
        let record = lockfile.read_record().expect("Failed to read record");

        assert_eq!(record.pid, 4242);
        assert_eq!(record.terminate, 0);
        assert_eq!(record.runcount, 1);
        assert!(record.starttime >= before);
        assert!(record.starttime <= current_timestamp());
        assert_eq!(record.exec, "sleep 3600");
    }

    #[test]
    fn test_positional_updates_leave_rest_intact() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lockfile =
            Lockfile::create(dir.path(), "svc", 1234, "sleep 3600").expect("Failed to create");

        lockfile.set_terminate(SUSPEND).expect("Failed to set terminate");
        let record = lockfile.read_record().expect("Failed to read record");
        assert_eq!(record.terminate, SUSPEND);
        assert_eq!(record.pid, 1234);
        assert_eq!(record.runcount, 1);
        assert_eq!(record.exec, "sleep 3600");

        let old_start = record.starttime;
        lockfile.reset_starttime().expect("Failed to reset starttime");
        let record = lockfile.read_record().expect("Failed to read record");
        assert!(record.starttime >= old_start);
        assert_eq!(record.terminate, SUSPEND, "starttime rewrite must be positional");
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        assert!(Lockfile::open(dir.path(), "ghost").is_err());
    }

    #[test]
    fn test_make_bumps_runcount_and_keeps_trailer() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        Lockfile::create(dir.path(), "svc", 100, "sleep 3600").expect("Failed to create");

        let lockfile = Lockfile::make(dir.path(), "svc", 200, "sleep 3600")
            .expect("Failed to make lock");
        let record = lockfile.read_record().expect("Failed to read record");

        assert_eq!(record.pid, 200);
        assert_eq!(record.runcount, 2);
        assert_eq!(record.exec, "sleep 3600");
    }

    #[test]
    fn test_make_creates_when_missing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lockfile = Lockfile::make(dir.path(), "fresh", 300, "sleep 1")
            .expect("Failed to make lock");
        let record = lockfile.read_record().expect("Failed to read record");

        assert_eq!(record.pid, 300);
        assert_eq!(record.runcount, 1);
        assert_eq!(record.exec, "sleep 1");
    }

    #[test]
    fn test_pid_status_variants() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        assert_eq!(lockfile::pid_status(dir.path(), "nobody"), PidStatus::Absent);

        let me = std::process::id() as i32;
        let lockfile = Lockfile::create(dir.path(), "svc", me, "test").expect("Failed to create");
        assert_eq!(lockfile::pid_status(dir.path(), "svc"), PidStatus::Running(me));

        lockfile.set_terminate(SUSPEND).expect("Failed to set terminate");
        assert_eq!(lockfile::pid_status(dir.path(), "svc"), PidStatus::Suspended);

        lockfile.set_terminate(ABORT).expect("Failed to set terminate");
        assert_eq!(lockfile::pid_status(dir.path(), "svc"), PidStatus::Aborted);

        lockfile.set_terminate(0).expect("Failed to set terminate");
        let dead = Lockfile::create(dir.path(), "dead", DEAD_PID, "test")
            .expect("Failed to create");
        drop(dead);
        assert_eq!(lockfile::pid_status(dir.path(), "dead"), PidStatus::Absent);
    }

    #[test]
    fn test_is_pid_active() {
        let me = std::process::id() as i32;
        assert!(lockfile::is_pid_active(me).expect("Failed to probe self"));
        assert!(!lockfile::is_pid_active(DEAD_PID).expect("Failed to probe dead pid"));
    }

    #[test]
    fn test_lock_cycle() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lockfile =
            Lockfile::create(dir.path(), "svc", 1, "test").expect("Failed to create");

        lockfile.lock_try().expect("Failed to take try-now lock");
        lockfile.unlock().expect("Failed to release lock");
        // Within the owning process a blocking acquire never waits.
        lockfile.lock_wait().expect("Failed to take blocking lock");
        lockfile.unlock().expect("Failed to release lock");
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        Lockfile::create(dir.path(), "svc", 1, "test").expect("Failed to create");

        lockfile::remove(dir.path(), "svc").expect("Failed to remove");
        assert_eq!(lockfile::pid_status(dir.path(), "svc"), PidStatus::Absent);
        assert!(lockfile::remove(dir.path(), "svc").is_err());
    }
}
