#![allow(clippy::unwrap_used)]
//! Integration tests running the `shardmul-node` binary.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread::sleep,
    time::{Duration, Instant},
};

fn node() -> Command {
    Command::new(PathBuf::from(env!("CARGO_BIN_EXE_shardmul-node")))
}

/// Kills the worker even if an assertion fails.
struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_for_announcements(registry: &Path, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let lines = fs::read_to_string(registry)
            .map(|content| content.lines().count())
            .unwrap_or(0);
        if lines >= count {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "workers did not announce themselves"
        );
        sleep(Duration::from_millis(50));
    }
}

fn start_worker(registry: &Path) -> KillOnDrop {
    let child = node()
        .arg("worker")
        .arg("--addr=127.0.0.1:0")
        .arg("--registry")
        .arg(registry)
        .arg("--memory-gb=2")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    KillOnDrop(child)
}

#[test]
fn dispatch_to_registered_workers() {
    let dir = tempfile::tempdir().unwrap();
    let registry = dir.path().join("workers.txt");
    let _workers = [start_worker(&registry), start_worker(&registry)];
    wait_for_announcements(&registry, 2);

    let output = node()
        .arg("dispatch")
        .arg("--registry")
        .arg(&registry)
        .args(["-n", "2", "--rows=12", "--inner=6", "--cols=3"])
        .args(["--horizontal=4", "--vertical=2", "--seed=7", "--redact"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "dispatch failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("12x3 product verified"), "{stdout}");
}

#[test]
fn float_job_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let registry = dir.path().join("workers.txt");
    let child = node()
        .arg("worker")
        .arg("--addr=127.0.0.1:0")
        .arg("--registry")
        .arg(&registry)
        .arg("--element=float")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let _worker = KillOnDrop(child);
    wait_for_announcements(&registry, 1);

    let job = dir.path().join("job.json");
    fs::write(
        &job,
        format!(
            r#"{{
                "rows": 6,
                "inner": 4,
                "cols": 2,
                "layout": {{ "horizontal": 3, "vertical": 2 }},
                "element": "float",
                "registry": {:?},
                "dispatch": {{ "keep_local": false }}
            }}"#,
            registry.display().to_string()
        ),
    )
    .unwrap();

    let output = node()
        .arg("dispatch")
        .arg("--job")
        .arg(&job)
        .arg("--print")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "dispatch failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().filter(|l| l.starts_with('[')).count(), 6);
}

#[test]
fn missing_registry_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let status = node()
        .arg("dispatch")
        .arg("--registry")
        .arg(dir.path().join("nobody.txt"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn invalid_layout_fails_before_selection() {
    let dir = tempfile::tempdir().unwrap();
    let output = node()
        .arg("dispatch")
        .arg("--registry")
        .arg(dir.path().join("nobody.txt"))
        .args(["--rows=2", "--horizontal=4", "--probe=connect"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let log = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(log.contains("does not fit"), "{log}");
    assert!(!log.contains("does not exist"), "{log}");
}
