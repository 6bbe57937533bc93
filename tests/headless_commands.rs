//! End-to-end command tests against a fake engine socket.

use std::sync::Arc;

use clap::Parser;
use tempfile::TempDir;

use dockwatch::cli::{Cli, Command};
use dockwatch::headless::{run_command, HeadlessEvent};
use dockwatch_app::{ActionOutcome, DockerService};
use dockwatch_engine::test_utils::{FakeEngine, FakeResponse};

async fn run(
    engine: &FakeEngine,
    args: &[&str],
) -> (dockwatch_core::Result<()>, Vec<HeadlessEvent>) {
    let config = TempDir::new().unwrap();
    let cli = Cli::try_parse_from(std::iter::once("dockwatch").chain(args.iter().copied()))
        .expect("arguments should parse");
    let service = Arc::new(DockerService::with_endpoint(engine.endpoint()));

    let mut events = Vec::new();
    let result =
        run_command(service, config.path(), cli.command, &mut |e| events.push(e)).await;
    (result, events)
}

#[tokio::test]
async fn inspect_prints_sorted_details() {
    let engine = FakeEngine::start().await;
    engine.route(
        "GET",
        "/containers/api/json",
        FakeResponse::json(
            200,
            r#"{
                "Id": "abc",
                "Name": "/api",
                "Config": {"Image": "api:latest", "Env": ["MODE=prod", "DEBUG"]},
                "NetworkSettings": {"Networks": {"zeta": {"IPAddress": "10.0.0.2"}, "Alpha": {}}}
            }"#,
        ),
    );

    let (result, events) = run(&engine, &["inspect", "api"]).await;
    result.unwrap();

    match &events[..] {
        [HeadlessEvent::ContainerDetails { details, .. }] => {
            assert_eq!(details.name, "api");
            assert_eq!(details.env[1].key, "DEBUG");
            assert_eq!(details.env[1].value, "");
            let networks: Vec<_> = details.networks.iter().map(|n| n.name.as_str()).collect();
            assert_eq!(networks, vec!["Alpha", "zeta"]);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn volume_prune_reports_reclaimed_space() {
    let engine = FakeEngine::with_sample_data().await;
    engine.route(
        "POST",
        "/volumes/prune",
        FakeResponse::json(200, r#"{"VolumesDeleted":["a","b"],"SpaceReclaimed":2048}"#),
    );

    let (result, events) = run(&engine, &["volume-prune"]).await;
    result.unwrap();

    match &events[..] {
        [HeadlessEvent::ActionCompleted {
            outcome: ActionOutcome::Pruned(report),
            ..
        }] => {
            assert_eq!(report.volumes_deleted, vec!["a", "b"]);
            assert_eq!(report.space_reclaimed, 2048);
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(engine.requests_to("/volumes").len(), 1);
}

#[tokio::test]
async fn missing_container_surfaces_engine_message() {
    let engine = FakeEngine::start().await;
    engine.route(
        "POST",
        "/containers/ghost/start",
        FakeResponse::json(404, r#"{"message":"No such container: ghost"}"#),
    );

    let (result, events) = run(&engine, &["start", "ghost"]).await;

    let err = result.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "No such container: ghost");
    assert!(events.is_empty());
}

#[tokio::test]
async fn networks_mark_builtin_entries() {
    let engine = FakeEngine::with_sample_data().await;

    let (result, events) = run(&engine, &["networks"]).await;
    result.unwrap();

    let rows: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            HeadlessEvent::Network { name, builtin, .. } => Some((name.as_str(), *builtin)),
            _ => None,
        })
        .collect();
    assert_eq!(rows, vec![("bridge", true), ("shop_default", false)]);
}

#[test]
fn parse_rejects_unknown_subcommand() {
    assert!(Cli::try_parse_from(["dockwatch", "compose"]).is_err());
    assert!(matches!(
        Cli::try_parse_from(["dockwatch", "volume-prune"]).unwrap().command,
        Command::VolumePrune
    ));
}
