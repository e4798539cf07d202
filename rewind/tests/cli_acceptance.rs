//! Binary-level acceptance tests for the rewind CLI and hook runner
//!
//! Each test runs the real executables against a throwaway project with an
//! overridden HOME, so nothing leaks into the developer's environment.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    project: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let project = base.join("project");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&project).expect("failed to create project");
        fs::write(project.join("a.txt"), "hi").expect("failed to seed project");
        fs::write(project.join("b.txt"), "ho").expect("failed to seed project");

        Self {
            _temp_dir: temp_dir,
            home,
            project,
        }
    }
}

fn run_rewind(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin = PathBuf::from(assert_cmd::cargo::cargo_bin!("rewind"));
    Command::new(bin)
        .args(args)
        .current_dir(&env.project)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", env.home.join(".config"))
        .env("XDG_STATE_HOME", env.home.join(".local/state"))
        .env_remove("CLAUDECODE")
        .env_remove("CLAUDE_PROJECT_DIR")
        .env_remove("FACTORY_SESSION_ID")
        .output()
        .expect("failed to execute rewind")
}

fn run_hook(env: &CliTestEnv, payload: &str) -> Output {
    let bin = PathBuf::from(assert_cmd::cargo::cargo_bin!("rewind-hook"));
    let mut child = Command::new(bin)
        .current_dir(&env.project)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", env.home.join(".config"))
        .env("XDG_STATE_HOME", env.home.join(".local/state"))
        .env_remove("CLAUDECODE")
        .env_remove("CLAUDE_PROJECT_DIR")
        .env_remove("FACTORY_SESSION_ID")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn rewind-hook");
    child
        .stdin
        .as_mut()
        .expect("missing stdin")
        .write_all(payload.as_bytes())
        .expect("failed to write payload");
    child.wait_with_output().expect("failed to wait for hook")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn snapshot_dirs(env: &CliTestEnv) -> Vec<String> {
    let dir = env.project.join(".rewind/code/snapshots");
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };
    read_dir
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn save_then_save_again_reports_no_changes() {
    let env = CliTestEnv::new();

    let first = run_rewind(&env, &["save", "first"]);
    assert_success(&first);
    assert!(stdout(&first).contains("Created checkpoint first_"));

    let second = run_rewind(&env, &["save", "second"]);
    assert_success(&second);
    assert!(stdout(&second).contains("No changes"));

    assert_eq!(snapshot_dirs(&env).len(), 1);
}

#[test]
fn restore_by_selector_round_trips_the_tree() {
    let env = CliTestEnv::new();
    assert_success(&run_rewind(&env, &["save", "first"]));

    fs::write(env.project.join("c.txt"), "new").unwrap();
    assert_success(&run_rewind(&env, &["save", "with c"]));

    let restore = run_rewind(&env, &["restore", "first", "--mode", "code"]);
    assert_success(&restore);
    assert!(stdout(&restore).contains("Safety snapshot: rewind_backup_"));

    assert!(!env.project.join("c.txt").exists());
    assert_eq!(fs::read_to_string(env.project.join("a.txt")).unwrap(), "hi");
}

#[test]
fn list_and_status_show_checkpoints() {
    let env = CliTestEnv::new();
    assert_success(&run_rewind(&env, &["save", "first"]));

    let list = run_rewind(&env, &["list"]);
    assert_success(&list);
    assert!(stdout(&list).contains("first_"));
    assert!(stdout(&list).contains("2 files"));

    let status = run_rewind(&env, &["status"]);
    assert_success(&status);
    let text = stdout(&status);
    assert!(text.contains("Checkpoints: 1"));
    assert!(text.contains("Latest:   first_"));
}

#[test]
fn validate_detects_a_gutted_snapshot() {
    let env = CliTestEnv::new();
    assert_success(&run_rewind(&env, &["save", "first"]));

    let ok = run_rewind(&env, &["validate"]);
    assert_success(&ok);

    let name = snapshot_dirs(&env).pop().unwrap();
    fs::remove_file(
        env.project
            .join(".rewind/code/snapshots")
            .join(&name)
            .join("files.tar.gz"),
    )
    .unwrap();

    let broken = run_rewind(&env, &["validate"]);
    assert_eq!(broken.status.code(), Some(1));
    assert!(stdout(&broken).contains("missing files.tar.gz"));
}

#[test]
fn unknown_selector_exits_one() {
    let env = CliTestEnv::new();
    assert_success(&run_rewind(&env, &["save", "first"]));

    let missing = run_rewind(&env, &["restore", "no-such-checkpoint"]);
    assert_eq!(missing.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&missing.stderr).contains("target not found"));
}

#[test]
fn init_and_config_write_project_settings() {
    let env = CliTestEnv::new();
    assert_success(&run_rewind(&env, &["init", "--mode", "project"]));
    assert!(env.project.join(".rewind/code/config.json").exists());

    assert_success(&run_rewind(&env, &["config", "tier", "aggressive"]));
    let config = fs::read_to_string(env.project.join(".rewind/code/config.json")).unwrap();
    assert!(config.contains("aggressive"));

    let bad = run_rewind(&env, &["config", "nonsense", "1"]);
    assert_eq!(bad.status.code(), Some(1));
}

#[test]
fn hook_runner_never_fails_the_agent() {
    let env = CliTestEnv::new();

    // Garbage payload: logged, exit 0, silent stdout.
    let garbage = run_hook(&env, "this is not json");
    assert_success(&garbage);
    assert!(stdout(&garbage).is_empty());

    // Structural event: forces a checkpoint.
    let payload = format!(
        r#"{{"hook_event_name":"session-start","session_id":"s1","cwd":"{}"}}"#,
        env.project.display()
    );
    let hook = run_hook(&env, &payload);
    assert_success(&hook);
    assert_eq!(snapshot_dirs(&env).len(), 1);

    // Same session immediately after: debounced or unchanged, still exit 0.
    let payload = format!(
        r#"{{"hook_event_name":"post-tool-use","session_id":"s1","cwd":"{}","tool_name":"Edit"}}"#,
        env.project.display()
    );
    let hook = run_hook(&env, &payload);
    assert_success(&hook);
    assert_eq!(snapshot_dirs(&env).len(), 1);
}
