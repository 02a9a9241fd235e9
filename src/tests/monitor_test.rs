#[cfg(test)]
mod tests {
    use crate::config::MonitorConfig;
    use crate::control;
    use crate::engine;
    use crate::lockfile::{self, Lockfile, PidStatus};
    use crate::monitor;
    use crate::resolver::link_dependencies;
    use crate::supervisor::SupervisorCtx;
    use crate::table::Process;

    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn ctx_with(dir: &TempDir, doc: &str) -> Arc<SupervisorCtx> {
        let ctx = SupervisorCtx::new(dir.path().to_path_buf(), false);
        let config: MonitorConfig = serde_json::from_str(doc).expect("Failed to parse doc");
        {
            let mut table = ctx.table.write().await;
            for entry in config.processes {
                table.insert(Process::from_entry(entry)).expect("insert failed");
            }
            link_dependencies(&mut table).expect("link failed");
        }
        ctx
    }

    async fn wait_for(mut pred: impl FnMut() -> bool, secs: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
        while tokio::time::Instant::now() < deadline {
            if pred() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        pred()
    }

    fn runcount(dir: &Path, id: &str) -> u64 {
        Lockfile::open(dir, id)
            .and_then(|l| l.read_record())
            .map(|r| r.runcount)
            .unwrap_or(0)
    }

    async fn cleanup(ctx: &Arc<SupervisorCtx>, dir: &Path, ids: &[&str]) {
        for id in ids {
            let _ = control::terminate_and_stop(dir, id);
        }
        let dir = dir.to_path_buf();
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        wait_for(
            move || {
                ids.iter()
                    .all(|id| !Lockfile::path_for(&dir, id).exists())
            },
            15,
        )
        .await;
        ctx.table.write().await.shutdown();
    }

    #[tokio::test]
    async fn test_dying_service_is_restarted_with_rising_runcount() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ctx = ctx_with(
            &dir,
            r#"{"processes": [{"id": "flappy", "exec": "false", "monitored": true}]}"#,
        )
        .await;

        let handle = { ctx.table.read().await.find("flappy").expect("missing") };
        monitor::init_process(&ctx, handle).await;

        let path = dir.path().to_path_buf();
        assert!(
            wait_for(move || Lockfile::path_for(&path, "flappy").exists(), 10).await,
            "lockfile should appear after the first spawn"
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        let first = runcount(dir.path(), "flappy");
        assert!(first >= 2, "expected repeated restarts, saw runcount {}", first);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = runcount(dir.path(), "flappy");
        assert!(
            second > first,
            "runcount should keep rising ({} then {})",
            first,
            second
        );

        cleanup(&ctx, dir.path(), &["flappy"]).await;
    }

    #[tokio::test]
    async fn test_suspend_then_resume() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ctx = ctx_with(
            &dir,
            r#"{"processes": [{"id": "svc", "exec": "sleep 30", "monitored": true}]}"#,
        )
        .await;

        let handle = { ctx.table.read().await.find("svc").expect("missing") };
        monitor::init_process(&ctx, handle).await;

        let path = dir.path().to_path_buf();
        assert!(
            wait_for(
                move || matches!(lockfile::pid_status(&path, "svc"), PidStatus::Running(_)),
                10
            )
            .await,
            "service should come up"
        );
        let pid = match lockfile::pid_status(dir.path(), "svc") {
            PidStatus::Running(pid) => pid,
            other => panic!("unexpected status {:?}", other),
        };

        control::terminate(dir.path(), "svc").expect("terminate failed");
        assert_eq!(lockfile::pid_status(dir.path(), "svc"), PidStatus::Suspended);
        let suspended_runcount = runcount(dir.path(), "svc");

        // The monitor task reaps the killed child and then just polls.
        assert!(
            wait_for(move || !lockfile::is_pid_active(pid).unwrap_or(true), 10).await,
            "killed child should be gone"
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(lockfile::pid_status(dir.path(), "svc"), PidStatus::Suspended);
        assert_eq!(runcount(dir.path(), "svc"), suspended_runcount);

        control::start(dir.path(), "svc").expect("start failed");
        let path = dir.path().to_path_buf();
        assert!(
            wait_for(
                move || {
                    runcount(&path, "svc") > suspended_runcount
                        && matches!(lockfile::pid_status(&path, "svc"), PidStatus::Running(_))
                },
                10
            )
            .await,
            "service should respawn after the resume"
        );

        cleanup(&ctx, dir.path(), &["svc"]).await;
    }

    #[tokio::test]
    async fn test_parent_restart_propagates_to_dependents() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ctx = ctx_with(
            &dir,
            r#"{"processes": [
                {"id": "parent", "exec": "sleep 30", "monitored": true},
                {
                    "id": "child",
                    "exec": "sleep 30",
                    "monitored": true,
                    "restart_on_parent_death": true,
                    "depends": ["parent"]
                }
            ]}"#,
        )
        .await;

        engine::run_processes(&ctx).await;

        let path = dir.path().to_path_buf();
        assert!(
            wait_for(
                move || {
                    matches!(lockfile::pid_status(&path, "parent"), PidStatus::Running(_))
                        && matches!(lockfile::pid_status(&path, "child"), PidStatus::Running(_))
                },
                10
            )
            .await,
            "both processes should come up"
        );
        assert_eq!(runcount(dir.path(), "parent"), 1);
        assert_eq!(runcount(dir.path(), "child"), 1);

        control::restart(dir.path(), "parent").expect("restart failed");

        let path = dir.path().to_path_buf();
        assert!(
            wait_for(
                move || runcount(&path, "parent") >= 2 && runcount(&path, "child") >= 2,
                15
            )
            .await,
            "the restart should ripple to the dependent"
        );

        cleanup(&ctx, dir.path(), &["parent", "child"]).await;
    }
}
