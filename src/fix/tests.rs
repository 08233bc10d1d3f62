//! Unit tests for fixes, the applicability filter and command-backed checks.

use rstest::rstest;

use super::*;
use crate::environment::ProjectContext;
use crate::exec::Target;
use crate::platform::{Dependency, Runtime, ToolVersion};
use crate::secrets::MemorySecretStore;
use crate::test_support::{HealthFlag, ScriptedExecutor, StaticProbe, StaticRemedy};

fn fix(id: &str, stage: Stage, os: OsConstraint) -> Fix {
    Fix::builder(id, stage)
        .os(os)
        .probe(StaticProbe::new(true))
        .manual_fix("do it by hand")
        .build()
        .unwrap_or_else(|err| panic!("build {id}: {err}"))
}

struct Harness {
    executor: ScriptedExecutor,
    secrets: MemorySecretStore,
    project: ProjectContext,
    target: Target,
}

impl Harness {
    fn new() -> Self {
        Self {
            executor: ScriptedExecutor::new(),
            secrets: MemorySecretStore::new(),
            project: ProjectContext::new("shop", "/srv/shop"),
            target: Target::Local,
        }
    }

    fn context(&self, os: Option<OsFamily>) -> FixContext<'_> {
        FixContext {
            stage: Stage::Dev,
            os,
            target: &self.target,
            environment: None,
            executor: &self.executor,
            secrets: &self.secrets,
            provisioner: None,
            project: &self.project,
        }
    }
}

#[test]
fn fix_without_remedy_needs_manual_text() {
    let err = Fix::builder("local.git", Stage::Dev)
        .probe(StaticProbe::new(true))
        .manual_fix("   ")
        .build()
        .expect_err("blank manual text is not enough");
    assert_eq!(
        err,
        FixError::MissingManualFix {
            id: String::from("local.git")
        }
    );
}

#[test]
fn fix_without_scan_is_rejected() {
    let err = Fix::builder("local.git", Stage::Dev)
        .remedy(StaticRemedy::new(true))
        .build()
        .expect_err("scan is mandatory");
    assert!(matches!(err, FixError::MissingProbe { .. }));
}

#[test]
fn blank_id_is_rejected() {
    let err = Fix::builder("  ", Stage::Dev)
        .probe(StaticProbe::new(false))
        .remedy(StaticRemedy::new(true))
        .build()
        .expect_err("id is mandatory");
    assert_eq!(err, FixError::MissingId);
}

#[test]
fn remedy_alone_satisfies_the_builder() {
    let built = Fix::builder("local.git", Stage::Dev)
        .probe(StaticProbe::new(false))
        .remedy(StaticRemedy::new(true))
        .build()
        .unwrap_or_else(|err| panic!("build: {err}"));
    assert!(built.has_remedy());
    assert_eq!(built.manual_fix(), None);
    assert_eq!(built.severity(), Severity::Warning);
}

#[rstest]
#[case(OsConstraint::Any, None, true)]
#[case(OsConstraint::Any, Some(OsFamily::Windows), true)]
#[case(OsConstraint::only([OsFamily::Ubuntu]), None, false)]
#[case(OsConstraint::only([OsFamily::Ubuntu]), Some(OsFamily::Ubuntu), true)]
#[case(OsConstraint::only([OsFamily::Ubuntu]), Some(OsFamily::Macos), false)]
#[case(OsConstraint::only([]), Some(OsFamily::Fedora), true)]
fn os_constraints(
    #[case] constraint: OsConstraint,
    #[case] os: Option<OsFamily>,
    #[case] expected: bool,
) {
    assert_eq!(constraint.admits(os), expected);
}

#[test]
fn applicability_keeps_catalog_order() {
    let catalog = vec![
        fix("c", Stage::Dev, OsConstraint::Any),
        fix("a", Stage::Prod, OsConstraint::Any),
        fix("b", Stage::Dev, OsConstraint::only([OsFamily::Macos])),
        fix("d", Stage::Dev, OsConstraint::only([OsFamily::Ubuntu])),
        fix("e", Stage::Dev, OsConstraint::Any),
    ];

    let selected = applicable(&catalog, Stage::Dev, Some(OsFamily::Macos));

    let ids: Vec<&str> = selected.iter().map(Fix::id).collect();
    assert_eq!(ids, vec!["c", "b", "e"]);
}

#[test]
fn unknown_os_admits_only_unconstrained_fixes() {
    let catalog = vec![
        fix("any", Stage::Staging, OsConstraint::Any),
        fix("linux", Stage::Staging, OsConstraint::only([OsFamily::Debian])),
    ];

    let selected = applicable(&catalog, Stage::Staging, None);

    let ids: Vec<&str> = selected.iter().map(Fix::id).collect();
    assert_eq!(ids, vec!["any"]);
}

#[rstest]
#[case("dev", Stage::Dev)]
#[case("Development", Stage::Dev)]
#[case("stage", Stage::Staging)]
#[case("PROD", Stage::Prod)]
#[case(" production ", Stage::Prod)]
fn stages_parse(#[case] input: &str, #[case] expected: Stage) {
    assert_eq!(input.parse::<Stage>(), Ok(expected));
}

#[test]
fn unknown_stage_is_named_in_the_error() {
    let err = "qa".parse::<Stage>().expect_err("qa is not a stage");
    assert_eq!(err.name, "qa");
}

#[rstest]
#[case("critical", Severity::Critical)]
#[case("warn", Severity::Warning)]
#[case("Info", Severity::Info)]
fn severities_parse(#[case] input: &str, #[case] expected: Severity) {
    assert_eq!(input.parse::<Severity>(), Ok(expected));
}

#[tokio::test]
async fn fix_without_remedy_reports_unavailable() {
    let harness = Harness::new();
    let manual = fix("local.manual", Stage::Dev, OsConstraint::Any);

    let err = manual
        .apply(&harness.context(None))
        .await
        .expect_err("no remedy to run");
    assert!(matches!(err, CheckError::Unavailable(_)));
}

#[tokio::test]
async fn command_probe_reports_failure_as_problem() {
    let harness = Harness::new();
    harness.executor.set_status("git --version", 0);
    let context = harness.context(None);

    let present = CommandProbe::new("git --version").scan(&context).await;
    let missing = CommandProbe::new("hg --version").scan(&context).await;

    assert!(matches!(present, Ok(false)));
    assert!(matches!(missing, Ok(true)));
}

#[tokio::test]
async fn command_remedy_surfaces_failing_install() {
    let harness = Harness::new();
    harness.executor.set_status("make install", 2);

    let err = CommandRemedy::new("make install", None)
        .apply(&harness.context(None))
        .await
        .expect_err("install exits non-zero");

    match err {
        CheckError::CommandFailed {
            command,
            status_text,
            ..
        } => {
            assert_eq!(command, "make install");
            assert_eq!(status_text, "2");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn command_remedy_reports_verification_result() {
    let harness = Harness::new();
    harness.executor.set_status("make install", 0);
    harness.executor.set_status("make check", 1);

    let repaired = CommandRemedy::new("make install", Some(String::from("make check")))
        .apply(&harness.context(None))
        .await;

    assert!(matches!(repaired, Ok(false)));
}

#[tokio::test]
async fn platform_probe_needs_a_known_os() {
    let harness = Harness::new();

    let err = PlatformProbe::new(Dependency::VersionControl)
        .scan(&harness.context(None))
        .await
        .expect_err("os is unknown");

    assert!(matches!(err, CheckError::Unavailable(_)));
    assert!(harness.executor.calls().is_empty());
}

#[tokio::test]
async fn platform_remedy_installs_then_rechecks() {
    let harness = Harness::new();
    let install = "sudo apt-get update && sudo apt-get install -y git";
    harness.executor.set_status("git --version", 127);
    harness.executor.set_status(install, 0);
    harness.executor.on_run(install, "git --version", 0);
    let context = harness.context(Some(OsFamily::Ubuntu));

    let before = PlatformProbe::new(Dependency::VersionControl)
        .scan(&context)
        .await;
    let repaired = PlatformRemedy::new(Dependency::VersionControl)
        .apply(&context)
        .await;
    let after = PlatformProbe::new(Dependency::VersionControl)
        .scan(&context)
        .await;

    assert!(matches!(before, Ok(true)));
    assert!(matches!(repaired, Ok(true)));
    assert!(matches!(after, Ok(false)));
    assert_eq!(harness.executor.call_count(install), 1);
}

#[tokio::test]
async fn daemon_probe_reads_service_state_on_linux() {
    let harness = Harness::new();
    harness
        .executor
        .set_stdout("systemctl is-active docker", "inactive\n");

    let problem = PlatformProbe::new(Dependency::ContainerDaemon)
        .scan(&harness.context(Some(OsFamily::Debian)))
        .await;

    assert!(matches!(problem, Ok(true)));
}

#[tokio::test]
async fn platform_remedy_without_install_returns_manual_text() {
    let harness = Harness::new();

    let err = PlatformRemedy::new(Dependency::PackageManager)
        .apply(&harness.context(Some(OsFamily::Fedora)))
        .await
        .expect_err("dnf cannot be installed automatically");

    match err {
        CheckError::Unavailable(message) => assert!(message.contains("dnf")),
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
#[case("v20.11.1\n", false)]
#[case("v16.3.0\n", true)]
#[case("garbage", true)]
#[tokio::test]
async fn version_probe_compares_against_minimum(#[case] reported: &str, #[case] problem: bool) {
    let harness = Harness::new();
    harness.executor.set_stdout("node --version", reported);

    let verdict = VersionProbe::new("node --version", ToolVersion::new(18, 0, 0))
        .scan(&harness.context(None))
        .await;

    assert_eq!(verdict.ok(), Some(problem));
}

fn node_runtime_fix() -> Fix {
    Fix::builder("node.runtime", Stage::Dev)
        .probe(VersionProbe::new("node --version", ToolVersion::new(18, 0, 0)))
        .remedy(PlatformRemedy::new(Dependency::LanguageRuntime(Runtime::Node)))
        .confirm_with_scan()
        .manual_fix("Install Node.js LTS")
        .build()
        .unwrap_or_else(|err| panic!("build node.runtime: {err}"))
}

#[tokio::test]
async fn confirmed_remedy_rejects_install_that_leaves_old_version() {
    let harness = Harness::new();
    harness.executor.set_stdout("node --version", "v16.20.0\n");
    harness.executor.set_status("brew install node", 0);

    let resolved = node_runtime_fix()
        .apply(&harness.context(Some(OsFamily::Macos)))
        .await;

    assert!(matches!(resolved, Ok(false)));
    assert_eq!(harness.executor.call_count("brew install node"), 1);
    assert_eq!(harness.executor.call_count("node --version"), 2);
}

#[tokio::test]
async fn confirmed_remedy_skips_rescan_when_install_fails() {
    let harness = Harness::new();
    harness.executor.set_stdout("node --version", "v16.20.0\n");
    harness.executor.set_status("brew install node", 1);

    let err = node_runtime_fix()
        .apply(&harness.context(Some(OsFamily::Macos)))
        .await
        .expect_err("install exits non-zero");

    assert!(matches!(err, CheckError::CommandFailed { .. }));
}

#[tokio::test]
async fn confirmed_remedy_accepts_a_clean_rescan() {
    let harness = Harness::new();
    let flag = HealthFlag::unhealthy();
    let fix = Fix::builder("local.flag", Stage::Dev)
        .probe(flag.clone())
        .remedy(flag.clone())
        .confirm_with_scan()
        .build()
        .unwrap_or_else(|err| panic!("build local.flag: {err}"));

    let resolved = fix.apply(&harness.context(None)).await;

    assert!(matches!(resolved, Ok(true)));
    assert!(flag.is_healthy());
}

#[tokio::test]
async fn fn_probe_sees_the_context() {
    let harness = Harness::new();
    let probe = FnProbe::new(|context| Ok(context.environment.is_none()));

    let verdict = probe.scan(&harness.context(None)).await;

    assert!(matches!(verdict, Ok(true)));
}
