//! Unit tests for the shell executor.

use std::ffi::OsString;
use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::secrets::MemorySecretStore;
use crate::test_support::ScriptedRunner;

#[fixture]
fn ssh_config() -> SshConfig {
    SshConfig {
        ssh_bin: String::from("ssh"),
        batch_mode: true,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
        connect_timeout_secs: 10,
    }
}

fn remote(key_secret: Option<&str>) -> Target {
    Target::Remote(RemoteHost {
        host: String::from("203.0.113.10"),
        port: 2222,
        user: String::from("deploy"),
        key_secret: key_secret.map(str::to_owned),
    })
}

fn strings(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[rstest]
#[tokio::test]
async fn local_commands_run_through_the_shell(ssh_config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "git version 2.43.0", "");
    let executor = ShellExecutor::new(
        runner.clone(),
        ssh_config,
        Arc::new(MemorySecretStore::new()),
    );

    let output = executor
        .execute(&Target::Local, "git --version")
        .await
        .unwrap_or_else(|err| panic!("local execution: {err}"));

    assert!(output.is_success());
    assert_eq!(output.stdout, "git version 2.43.0");
    let invocations = runner.invocations();
    let first = invocations
        .first()
        .unwrap_or_else(|| panic!("expected one invocation"));
    if cfg!(windows) {
        assert_eq!(first.program, "cmd");
    } else {
        assert_eq!(first.program, "sh");
        assert_eq!(strings(&first.args), vec!["-c", "git --version"]);
    }
}

#[rstest]
#[tokio::test]
async fn remote_commands_carry_port_and_options(ssh_config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let executor = ShellExecutor::new(
        runner.clone(),
        ssh_config,
        Arc::new(MemorySecretStore::new()),
    );

    executor
        .execute(&remote(None), "true")
        .await
        .unwrap_or_else(|err| panic!("remote execution: {err}"));

    let invocations = runner.invocations();
    let first = invocations
        .first()
        .unwrap_or_else(|| panic!("expected one invocation"));
    assert_eq!(first.program, "ssh");
    let args = strings(&first.args);
    assert_eq!(args.first().map(String::as_str), Some("-p"));
    assert_eq!(args.get(1).map(String::as_str), Some("2222"));
    assert!(args.contains(&String::from("BatchMode=yes")));
    assert!(args.contains(&String::from("StrictHostKeyChecking=no")));
    assert!(args.contains(&String::from("UserKnownHostsFile=/dev/null")));
    assert!(!args.contains(&String::from("-i")));
    assert_eq!(
        args.iter().rev().take(2).cloned().collect::<Vec<_>>(),
        vec![String::from("true"), String::from("deploy@203.0.113.10")]
    );
}

#[rstest]
#[tokio::test]
async fn remote_key_is_materialised_and_removed(ssh_config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let secrets = MemorySecretStore::new().with("deploy-key", "PRIVATE KEY");
    let executor = ShellExecutor::new(runner.clone(), ssh_config, Arc::new(secrets));

    executor
        .execute(&remote(Some("deploy-key")), "uptime")
        .await
        .unwrap_or_else(|err| panic!("remote execution: {err}"));

    let invocations = runner.invocations();
    let args = strings(
        &invocations
            .first()
            .unwrap_or_else(|| panic!("expected one invocation"))
            .args,
    );
    let position = args
        .iter()
        .position(|arg| arg == "-i")
        .unwrap_or_else(|| panic!("identity flag missing: {args:?}"));
    let key_path = args
        .get(position + 1)
        .unwrap_or_else(|| panic!("identity path missing"));
    assert!(!std::path::Path::new(key_path).exists());
}

#[rstest]
#[tokio::test]
async fn missing_key_secret_is_reported(ssh_config: SshConfig) {
    let runner = ScriptedRunner::new();
    let executor = ShellExecutor::new(
        runner.clone(),
        ssh_config,
        Arc::new(MemorySecretStore::new()),
    );

    let err = executor
        .execute(&remote(Some("deploy-key")), "uptime")
        .await
        .expect_err("missing secret should fail");

    assert_eq!(
        err,
        ExecError::MissingSecret {
            name: String::from("deploy-key")
        }
    );
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn unassigned_targets_are_rejected(ssh_config: SshConfig) {
    let runner = ScriptedRunner::new();
    let executor = ShellExecutor::new(runner, ssh_config, Arc::new(MemorySecretStore::new()));

    let err = executor
        .execute(&Target::Unassigned, "true")
        .await
        .expect_err("unassigned target should fail");

    assert_eq!(err, ExecError::UnassignedTarget);
}

#[rstest]
fn strict_checking_keeps_host_key_verification(mut ssh_config: SshConfig) {
    ssh_config.strict_host_key_checking = true;
    let args = strings(&ssh_config.common_options(22));
    assert!(!args.contains(&String::from("StrictHostKeyChecking=no")));
    assert!(args.contains(&String::from("ConnectTimeout=10")));
}

#[test]
fn target_display_is_readable() {
    assert_eq!(remote(None).to_string(), "deploy@203.0.113.10:2222");
    assert_eq!(Target::Local.to_string(), "local");
}

#[tokio::test]
async fn process_runner_reports_spawn_failures() {
    let runner = ProcessCommandRunner::default();
    let err = runner
        .run("driftfix-definitely-missing-binary", &[])
        .await
        .expect_err("missing binary should fail");
    assert!(matches!(err, ExecError::Spawn { .. }));
}
