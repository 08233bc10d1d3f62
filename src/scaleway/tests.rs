//! Unit tests for the Scaleway provider, driven by a scripted `scw`.

use std::collections::HashMap;

use rstest::{fixture, rstest};
use scaleway_rs::ScalewayImage;

use super::cli::parse_created;
use super::instance::{filter_images, resolve_image_with, select_image_id};
use super::*;
use crate::provision::{ProjectIdentity, ResourceOrigin};
use crate::test_support::ScriptedRunner;

#[fixture]
fn config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: None,
        secret_key: String::from("dummy"),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("fr-par-1"),
        default_region: String::from("fr-par"),
        default_instance_type: String::from("DEV1-S"),
        default_image: String::from("Ubuntu 24.04 Noble Numbat"),
        default_architecture: String::from("x86_64"),
        scw_bin: String::from("scw"),
        command_timeout_secs: 5,
        readiness_timeout_secs: 5,
        readiness_poll_secs: 1,
    }
}

fn spec(role: ResourceRole, dependencies: Vec<ResourceHandle>) -> ResourceSpec {
    let identity = ProjectIdentity::new("shop", "production");
    ResourceSpec {
        role,
        name: identity.resource_name(role),
        tags: identity.tags_for(role),
        dependencies,
        ingress_ports: vec![22, 443],
        public_key: None,
        domain: None,
    }
}

fn provider(config: ScalewayConfig) -> (ScalewayProvider<ScriptedRunner>, ScriptedRunner) {
    let runner = ScriptedRunner::new();
    (ScalewayProvider::new(config, runner.clone()), runner)
}

fn commands(runner: &ScriptedRunner) -> Vec<String> {
    runner
        .invocations()
        .iter()
        .map(|invocation| invocation.command_string())
        .collect()
}

fn image(id: &str, arch: &str, state: &str, creation_date: &str) -> ScalewayImage {
    ScalewayImage {
        id: id.to_owned(),
        name: String::new(),
        arch: arch.to_owned(),
        creation_date: creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

#[rstest]
#[tokio::test]
async fn find_matches_every_identity_tag(config: ScalewayConfig) {
    let (provider, runner) = provider(config);
    let wanted = spec(ResourceRole::Network, Vec::new());
    let listing = serde_json::json!([
        {"id": "vpc-other", "name": "x", "tags": ["driftfix-role=network"]},
        {"id": "vpc-1", "name": wanted.name, "tags": wanted.tags.as_slice()},
    ]);
    runner.push_output(Some(0), listing.to_string(), "");

    let found = provider
        .find(&wanted)
        .await
        .unwrap_or_else(|err| panic!("find failed: {err}"));

    let handle = found.unwrap_or_else(|| panic!("network should be found"));
    assert_eq!(handle.id, "vpc-1");
    assert_eq!(handle.kind, "vpc.vpc");
    assert_eq!(handle.origin, ResourceOrigin::Discovered);
    let issued = commands(&runner);
    let command = issued.first().map_or("", String::as_str);
    assert!(command.starts_with(
        "scw vpc vpc list project-id=proj region=fr-par tags.0=driftfix-project=shop"
    ));
    assert!(command.ends_with("-o json"));
}

#[rstest]
#[case("null")]
#[case("")]
#[case("[]")]
#[tokio::test]
async fn empty_listings_find_nothing(config: ScalewayConfig, #[case] stdout: &str) {
    let (provider, runner) = provider(config);
    runner.push_output(Some(0), stdout, "");

    let found = provider
        .find(&spec(ResourceRole::SecurityGroup, Vec::new()))
        .await
        .unwrap_or_else(|err| panic!("find failed: {err}"));

    assert!(found.is_none());
}

#[rstest]
#[tokio::test]
async fn key_pairs_are_found_by_name(config: ScalewayConfig) {
    let (provider, runner) = provider(config);
    let wanted = spec(ResourceRole::KeyPair, Vec::new());
    runner.push_output(
        Some(0),
        serde_json::json!([{"id": "key-1", "name": wanted.name}]).to_string(),
        "",
    );

    let found = provider
        .find(&wanted)
        .await
        .unwrap_or_else(|err| panic!("find failed: {err}"));

    assert_eq!(found.map(|handle| handle.id), Some(String::from("key-1")));
    assert_eq!(
        commands(&runner),
        vec![format!(
            "scw iam ssh-key list project-id=proj name={} -o json",
            wanted.name
        )]
    );
}

#[rstest]
#[tokio::test]
async fn cli_failures_carry_status_and_stderr(config: ScalewayConfig) {
    let (provider, runner) = provider(config);
    runner.push_output(Some(1), "", "permission denied");

    let err = provider
        .find(&spec(ResourceRole::Database, Vec::new()))
        .await
        .expect_err("scw failed");

    assert_eq!(
        err,
        ProviderError::CommandFailure {
            program: String::from("scw"),
            status_text: String::from("1"),
            stderr: String::from("database: permission denied"),
        }
    );
}

#[rstest]
#[tokio::test]
async fn route_lookup_needs_gateway_and_subnet(config: ScalewayConfig) {
    let (provider, runner) = provider(config);

    let err = provider
        .find(&spec(ResourceRole::RouteTable, Vec::new()))
        .await
        .expect_err("dependencies missing");

    assert_eq!(
        err,
        ProviderError::MissingDependency {
            role: ResourceRole::RouteTable,
            requires: ResourceRole::InternetGateway,
        }
    );
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn security_groups_open_each_ingress_port(config: ScalewayConfig) {
    let (provider, runner) = provider(config);
    let network = ResourceHandle::discovered(ResourceRole::Network, "vpc.vpc", "vpc-1");
    runner.push_output(
        Some(0),
        r#"{"security_group": {"id": "sg-1", "name": "g"}}"#,
        "",
    );
    runner.push_success();
    runner.push_success();

    let handle = provider
        .create(&spec(ResourceRole::SecurityGroup, vec![network]))
        .await
        .unwrap_or_else(|err| panic!("create failed: {err}"));

    assert_eq!(handle.id, "sg-1");
    assert_eq!(handle.origin, ResourceOrigin::Created);
    let issued = commands(&runner);
    assert_eq!(issued.len(), 3);
    assert!(issued.iter().skip(1).all(|command| command
        .starts_with("scw instance security-group create-rule security-group-id=sg-1")));
    assert!(issued.last().is_some_and(|command| command.contains("dest-port-from=443")));
}

#[rstest]
#[tokio::test]
async fn failed_follow_up_deletes_the_new_resource(config: ScalewayConfig) {
    let (provider, runner) = provider(config);
    let instance = ResourceHandle::created(ResourceRole::Instance, "instance.server", "srv-1");
    runner.push_output(Some(0), r#"{"id": "ip-1", "address": "51.15.0.9"}"#, "");
    runner.push_failure(1);
    runner.push_success();

    let err = provider
        .create(&spec(ResourceRole::ElasticIp, vec![instance]))
        .await
        .expect_err("attach failed");

    assert!(matches!(err, ProviderError::CommandFailure { .. }));
    assert_eq!(
        commands(&runner).last().map(String::as_str),
        Some("scw instance ip delete ip-1 zone=fr-par-1")
    );
}

#[rstest]
#[tokio::test]
async fn key_pairs_need_a_public_key(config: ScalewayConfig) {
    let (provider, runner) = provider(config);

    let err = provider
        .create(&spec(ResourceRole::KeyPair, Vec::new()))
        .await
        .expect_err("no public key");

    assert!(matches!(
        err,
        ProviderError::Provider { ref message } if message.contains("ssh_public_key")
    ));
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn buckets_are_keyed_by_name(config: ScalewayConfig) {
    let (provider, runner) = provider(config);
    let wanted = spec(ResourceRole::ObjectStorage, Vec::new());
    runner.push_output(Some(0), r#"{"Name": "ignored", "Location": "fr-par"}"#, "");

    let handle = provider
        .create(&wanted)
        .await
        .unwrap_or_else(|err| panic!("create failed: {err}"));

    assert_eq!(handle.id, wanted.name);
    assert_eq!(
        commands(&runner),
        vec![format!(
            "scw object bucket create {} region=fr-par -o json",
            wanted.name
        )]
    );
}

#[rstest]
#[tokio::test]
async fn mail_domains_are_revoked_not_deleted(config: ScalewayConfig) {
    let (provider, runner) = provider(config);
    runner.push_success();
    let handle = ResourceHandle::created(ResourceRole::MailDomain, "tem.domain", "dom-1");

    provider
        .delete(&handle)
        .await
        .unwrap_or_else(|err| panic!("delete failed: {err}"));

    assert_eq!(
        commands(&runner),
        vec![String::from("scw tem domain revoke dom-1 region=fr-par")]
    );
}

#[test]
fn created_output_may_be_wrapped() {
    let wrapped = parse_created(r#"{"ip": {"id": "ip-9", "address": "203.0.113.4"}}"#, "ip")
        .unwrap_or_else(|err| panic!("parse failed: {err}"));
    assert_eq!(wrapped.identifier(), "ip-9");
    assert_eq!(wrapped.public_address(), Some("203.0.113.4"));

    let err = parse_created("not json", "ip").expect_err("invalid json");
    assert!(matches!(err, ProviderError::Parse { .. }));
}

#[test]
fn newest_available_image_for_the_architecture_wins() {
    let images = vec![
        image("old", "x86_64", "available", "2024-01-01T00:00:00Z"),
        image("new", "x86_64", "available", "2024-06-01T00:00:00Z"),
        image("arm", "arm64", "available", "2025-01-01T00:00:00Z"),
        image("broken", "x86_64", "error", "2025-02-01T00:00:00Z"),
    ];

    let chosen = select_image_id(filter_images(images, "x86_64"), "Ubuntu", "x86_64");

    assert_eq!(chosen, Ok(String::from("new")));
}

#[test]
fn missing_images_are_reported() {
    let err = select_image_id(Vec::new(), "Ubuntu", "x86_64").expect_err("no candidates");
    assert!(matches!(err, ProviderError::Provider { ref message } if message.contains("Ubuntu")));
}

#[tokio::test]
async fn project_images_shadow_public_ones() {
    let chosen = resolve_image_with(
        "Ubuntu",
        "x86_64",
        || async { Ok(vec![image("project", "x86_64", "available", "2024-01-01")]) },
        || async {
            Err(ProviderError::Provider {
                message: String::from("public images should not be fetched"),
            })
        },
    )
    .await;

    assert_eq!(chosen, Ok(String::from("project")));

    let fallback = resolve_image_with(
        "Ubuntu",
        "x86_64",
        || async { Ok(Vec::new()) },
        || async { Ok(vec![image("public", "x86_64", "available", "2024-01-01")]) },
    )
    .await;

    assert_eq!(fallback, Ok(String::from("public")));
}
