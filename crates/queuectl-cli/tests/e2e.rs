//! End-to-end tests driving the `queuectl` binary: enqueue → worker →
//! terminal state, priority ordering, graceful shutdown, and the
//! documented exit codes.

use std::process::{Command, Output};

use tempfile::TempDir;

use queuectl_core::JobState;
use queuectl_store_sqlite::SqliteJobStore;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Self { dir: TempDir::new().unwrap() }
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_queuectl"));
        command.current_dir(self.dir.path()).args(args);
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd(args).output().expect("run queuectl")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "queuectl {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn exit_code(&self, args: &[&str]) -> i32 {
        self.run(args).status.code().expect("exit code")
    }

    async fn store(&self) -> SqliteJobStore {
        SqliteJobStore::open(&self.dir.path().join("queue.db")).await.unwrap()
    }
}

#[tokio::test]
async fn happy_path_enqueue_worker_complete() {
    let env = Env::new();
    env.run_ok(&["enqueue", r#"{"id":"a","command":"echo ok"}"#]);

    let code = env.exit_code(&["worker", "start", "--count", "1", "--idle-timeout", "1"]);
    assert_eq!(code, 0);

    let job = env.store().await.get("a").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.finished_at.is_some());

    let log = std::fs::read_to_string(env.dir.path().join("logs/job_a.log")).unwrap();
    assert!(log.contains("ok"));
    assert!(log.contains("--- START "));
    assert!(log.contains("rc=0 ---"));

    let shown = env.run_ok(&["logs", "a", "--tail", "10"]);
    assert!(shown.contains("ok"));
}

#[tokio::test]
async fn higher_priority_job_starts_first() {
    let env = Env::new();
    env.run_ok(&["enqueue", r#"{"id":"lo","command":"echo lo","priority":0}"#]);
    env.run_ok(&["enqueue", r#"{"id":"hi","command":"echo hi","priority":10}"#]);

    let code = env.exit_code(&["worker", "start", "--count", "1", "--idle-timeout", "1"]);
    assert_eq!(code, 0);

    let store = env.store().await;
    let hi = store.get("hi").await.unwrap().unwrap();
    let lo = store.get("lo").await.unwrap().unwrap();
    assert_eq!(hi.state, JobState::Completed);
    assert_eq!(lo.state, JobState::Completed);
    assert!(hi.started_at.unwrap() < lo.started_at.unwrap());
}

#[tokio::test]
async fn failing_job_dead_letters_and_can_be_revived() {
    let env = Env::new();
    env.run_ok(&["enqueue", r#"{"id":"b","command":"false","max_retries":0}"#]);

    assert_eq!(env.exit_code(&["worker", "start", "--count", "1", "--idle-timeout", "1"]), 0);

    let job = env.store().await.get("b").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.is_some());

    let listed = env.run_ok(&["dlq", "list"]);
    assert!(listed.contains('b'));

    env.run_ok(&["dlq", "retry", "b"]);
    let revived = env.store().await.get("b").await.unwrap().unwrap();
    assert_eq!(revived.state, JobState::Pending);
    assert_eq!(revived.attempts, 0);

    // Second retry: no longer dead.
    assert_eq!(env.exit_code(&["dlq", "retry", "b"]), 4);
}

#[test]
fn graceful_shutdown_finishes_inflight_job() {
    let env = Env::new();
    env.run_ok(&["enqueue", r#"{"id":"slow","command":"sleep 2"}"#]);

    let mut supervisor = env
        .cmd(&["worker", "start", "--count", "1", "--idle-timeout", "30"])
        .spawn()
        .unwrap();

    // Give the worker time to claim, then request shutdown.
    std::thread::sleep(std::time::Duration::from_millis(1200));
    Command::new("kill")
        .args(["-TERM", &supervisor.id().to_string()])
        .status()
        .unwrap();

    let status = supervisor.wait().unwrap();
    assert!(status.success(), "supervisor exited {status:?}");

    // The in-flight job was finalized, not abandoned.
    let listed = env.run_ok(&["list", "--state", "completed"]);
    assert!(listed.contains("slow"), "list output was: {listed}");
    let processing = env.run_ok(&["list", "--state", "processing"]);
    assert!(processing.contains("no jobs"), "processing output was: {processing}");
}

#[test]
fn exit_codes_match_the_contract() {
    let env = Env::new();

    // 2: malformed JSON and invalid specs.
    assert_eq!(env.exit_code(&["enqueue", "{not json"]), 2);
    assert_eq!(env.exit_code(&["enqueue", r#"{"id":"","command":"true"}"#]), 2);

    // 3: duplicate id.
    env.run_ok(&["enqueue", r#"{"id":"dup","command":"true"}"#]);
    assert_eq!(env.exit_code(&["enqueue", r#"{"id":"dup","command":"true"}"#]), 3);

    // 4: dlq retry on a job that is not dead.
    assert_eq!(env.exit_code(&["dlq", "retry", "dup"]), 4);

    // 5: unknown ids.
    assert_eq!(env.exit_code(&["dlq", "retry", "ghost"]), 5);
    assert_eq!(env.exit_code(&["logs", "ghost"]), 5);

    // 2: bad config updates.
    assert_eq!(env.exit_code(&["config", "set", "bogus_key", "1"]), 2);
    assert_eq!(env.exit_code(&["config", "set", "poll_interval", "-1"]), 2);
}

#[test]
fn config_set_roundtrips_through_the_file() {
    let env = Env::new();
    env.run_ok(&["config", "set", "max_retries", "9"]);
    env.run_ok(&["config", "set", "default_timeout_seconds", "12.5"]);

    let shown = env.run_ok(&["config", "get"]);
    assert!(shown.contains("\"max_retries\": 9"));
    assert!(shown.contains("\"default_timeout_seconds\": 12.5"));
}

#[test]
fn reset_backs_up_and_reinitializes() {
    let env = Env::new();
    env.run_ok(&["enqueue", r#"{"id":"keep","command":"true"}"#]);
    env.run_ok(&["reset", "--yes"]);

    // Fresh, empty queue.
    let listed = env.run_ok(&["list"]);
    assert!(listed.contains("no jobs"));

    // The old database landed in a backup directory.
    let backup = std::fs::read_dir(env.dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().starts_with("backup_"))
        .expect("backup directory created");
    assert!(backup.path().join("queue.db").exists());
}
