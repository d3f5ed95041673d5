// End-to-end tests running the procguard binary as separate processes

#![cfg(any(target_os = "linux", target_os = "android"))]

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_procguard");

/// Kills the process on drop so a failed assertion does not leak it
struct Reaper(u32);

impl Drop for Reaper {
    fn drop(&mut self) {
        let _ = kill(Pid::from_raw(self.0 as i32), Signal::SIGKILL);
    }
}

fn spawn_foreground(pid_file: &Path) -> Child {
    Command::new(BIN)
        .args(["run", "--foreground", "--pid-file"])
        .arg(pid_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

fn recorded_pid(pid_file: &Path) -> Option<u32> {
    fs::read_to_string(pid_file).ok()?.parse().ok()
}

fn stop(pid_file: &Path) -> bool {
    Command::new(BIN)
        .args(["stop", "--timeout", "5", "--pid-file"])
        .arg(pid_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap()
        .success()
}

fn pid_path(dir: &TempDir) -> PathBuf {
    dir.path().join("test.pid")
}

#[test]
fn test_single_instance_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let pid_file = pid_path(&temp_dir);

    let mut first = spawn_foreground(&pid_file);
    let _reap_first = Reaper(first.id());
    assert!(wait_for(|| recorded_pid(&pid_file) == Some(first.id())));

    // Give the holder time to install its signal handlers
    std::thread::sleep(Duration::from_millis(300));

    let second = Command::new(BIN)
        .args(["run", "--foreground", "--pid-file"])
        .arg(&pid_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(second.code(), Some(1));
    assert_eq!(recorded_pid(&pid_file), Some(first.id()));

    assert!(stop(&pid_file));
    assert!(first.wait().unwrap().success());
    assert!(!pid_file.exists());

    let mut third = spawn_foreground(&pid_file);
    let _reap_third = Reaper(third.id());
    assert!(wait_for(|| recorded_pid(&pid_file) == Some(third.id())));
    std::thread::sleep(Duration::from_millis(300));

    assert!(stop(&pid_file));
    assert!(third.wait().unwrap().success());
    assert!(!pid_file.exists());
}

#[test]
fn test_stale_file_from_killed_process_is_replaced() {
    let temp_dir = TempDir::new().unwrap();
    let pid_file = pid_path(&temp_dir);

    let mut victim = spawn_foreground(&pid_file);
    assert!(wait_for(|| recorded_pid(&pid_file) == Some(victim.id())));
    victim.kill().unwrap();
    victim.wait().unwrap();
    assert!(pid_file.exists());

    let mut next = spawn_foreground(&pid_file);
    let _reap = Reaper(next.id());
    assert!(wait_for(|| recorded_pid(&pid_file) == Some(next.id())));
    std::thread::sleep(Duration::from_millis(300));

    assert!(stop(&pid_file));
    assert!(next.wait().unwrap().success());
}

#[test]
fn test_status_reports_unclaimed_file() {
    let temp_dir = TempDir::new().unwrap();
    let pid_file = pid_path(&temp_dir);
    fs::write(&pid_file, "4821").unwrap();

    let output = Command::new(BIN)
        .args(["status", "--pid-file"])
        .arg(&pid_file)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("stale PID file"));
    assert!(stdout.contains("4821"));
}

#[test]
fn test_background_mode_detaches() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let pid_file = pid_path(&temp_dir);

    let launcher = Command::new(BIN)
        .args(["run", "--daemon", "--pid-file"])
        .arg(&pid_file)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let launcher_pid = launcher.id();
    let output = launcher.wait_with_output().unwrap();
    assert!(output.status.success());

    assert!(wait_for(|| recorded_pid(&pid_file).is_some()));
    let daemon_pid = recorded_pid(&pid_file).unwrap();
    let _reap = Reaper(daemon_pid);
    assert_ne!(daemon_pid, launcher_pid);

    let proc_dir = PathBuf::from(format!("/proc/{}", daemon_pid));
    assert_eq!(fs::read_link(proc_dir.join("cwd")).unwrap(), PathBuf::from("/"));
    assert_eq!(
        fs::read_link(proc_dir.join("fd/1")).unwrap(),
        PathBuf::from("/dev/null")
    );
    assert_eq!(
        fs::read_link(proc_dir.join("fd/2")).unwrap(),
        PathBuf::from("/dev/null")
    );

    // umask was cleared, so the mode is exactly what was requested
    let mode = fs::metadata(&pid_file).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o444);

    std::thread::sleep(Duration::from_millis(300));
    assert!(stop(&pid_file));
    assert!(wait_for(|| !pid_file.exists()));
}

#[test]
fn test_unwritable_pid_directory_exits_with_failure() {
    let temp_dir = TempDir::new().unwrap();
    let pid_file = temp_dir.path().join("missing").join("test.pid");

    let status = Command::new(BIN)
        .args(["run", "--foreground", "--pid-file"])
        .arg(&pid_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();

    assert_eq!(status.code(), Some(1));
}
