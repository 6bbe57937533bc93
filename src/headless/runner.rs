//! Command runner - one command per process, results as NDJSON events
//!
//! Settings are loaded from disk, CLI flags override them for this run only,
//! and the backend is resolved before any engine request is made. A failing
//! command emits a fatal `error` event and returns the error so the binary
//! can exit non-zero.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dockwatch_app::config::{default_config_dir, load_settings, save_settings, settings_path};
use dockwatch_app::{
    Action, ActionDispatcher, Collection, ContainerAction, DetailView, DockerService,
    FollowEvent, FollowOptions, LogOptions, Settings,
};
use dockwatch_core::prelude::*;

use super::HeadlessEvent;
use crate::cli::{Cli, Command, ConfigCommand, LogsArgs};

/// How long consecutive log output is merged before it is printed.
const LOG_BATCH_WINDOW: Duration = Duration::from_millis(50);

/// Run a parsed command line, printing events to stdout.
pub async fn run(cli: Cli) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("dockwatch {:?}", cli.command);
    info!("═══════════════════════════════════════════════════════");

    let result = execute(cli).await;
    if let Err(e) = &result {
        error!("Command failed: {}", e);
        HeadlessEvent::error(e.to_string(), true).emit();
    }
    result
}

async fn execute(cli: Cli) -> Result<()> {
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => default_config_dir()
            .ok_or_else(|| Error::config("could not determine the configuration directory"))?,
    };

    let mut settings = load_settings(&config_dir);
    if let Some(preference) = cli.backend {
        settings.backend.preference = preference;
    }
    if let Some(socket) = cli.socket {
        settings.backend.custom_socket = Some(socket);
    }

    let service = Arc::new(DockerService::from_system(settings.backend));
    let backend = service.resolve();
    info!("Resolved backend: {}", backend);
    run_command(service, &config_dir, cli.command, &mut |event| event.emit()).await
}

/// Run one command against `service`, handing every result to `emit`.
///
/// The service's backend must already be resolved; commands that need the
/// engine fail with [`Error::SocketUnavailable`] when none was found.
pub async fn run_command(
    service: Arc<DockerService>,
    config_dir: &Path,
    command: Command,
    emit: &mut dyn FnMut(HeadlessEvent),
) -> Result<()> {
    let dispatcher = ActionDispatcher::new(Arc::clone(&service));

    match command {
        Command::Status => status(&service, emit).await,
        Command::Ps { all } => {
            list(&service, Collection::Containers).await?;
            service
                .snapshot()
                .containers
                .iter()
                .filter(|c| all || c.is_running())
                .for_each(|c| emit(HeadlessEvent::container(c)));
            Ok(())
        }
        Command::Images => {
            list(&service, Collection::Images).await?;
            service
                .snapshot()
                .images
                .iter()
                .for_each(|i| emit(HeadlessEvent::image(i)));
            Ok(())
        }
        Command::Volumes => {
            list(&service, Collection::Volumes).await?;
            service
                .snapshot()
                .volumes
                .iter()
                .for_each(|v| emit(HeadlessEvent::volume(v)));
            Ok(())
        }
        Command::Networks => {
            list(&service, Collection::Networks).await?;
            service
                .snapshot()
                .networks
                .iter()
                .for_each(|n| emit(HeadlessEvent::network(n)));
            Ok(())
        }
        Command::Inspect { id } => {
            ensure_backend(&service)?;
            let details = service.inspect(&id).await?;
            emit(HeadlessEvent::container_details(details));
            Ok(())
        }
        Command::Logs(args) => {
            ensure_backend(&service)?;
            if args.follow {
                follow_logs(service, args, emit).await
            } else {
                let options = LogOptions {
                    follow: false,
                    tail: Some(args.tail),
                    timestamps: args.timestamps,
                };
                for chunk in service.fetch_logs(&args.id, options).await? {
                    emit(HeadlessEvent::log(&args.id, chunk));
                }
                Ok(())
            }
        }
        Command::Start { id } => {
            container_action(&dispatcher, id, ContainerAction::Start, emit).await
        }
        Command::Stop { id } => {
            container_action(&dispatcher, id, ContainerAction::Stop, emit).await
        }
        Command::Restart { id } => {
            container_action(&dispatcher, id, ContainerAction::Restart, emit).await
        }
        Command::Kill { id } => {
            container_action(&dispatcher, id, ContainerAction::Kill, emit).await
        }
        Command::Rm { id, force } => {
            dispatch(&dispatcher, Action::RemoveContainer { id, force }, emit).await
        }
        Command::Rmi { id, force } => {
            dispatch(&dispatcher, Action::RemoveImage { id, force }, emit).await
        }
        Command::VolumeRm { name } => {
            dispatch(&dispatcher, Action::RemoveVolume { name }, emit).await
        }
        Command::VolumePrune => dispatch(&dispatcher, Action::PruneVolumes, emit).await,
        Command::NetworkRm { id } => {
            dispatch(&dispatcher, Action::RemoveNetwork { id }, emit).await
        }
        Command::Config(command) => configure(config_dir, command, emit),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_backend(service: &DockerService) -> Result<()> {
    if service.snapshot().backend.is_available() {
        Ok(())
    } else {
        Err(Error::SocketUnavailable)
    }
}

async fn list(service: &DockerService, collection: Collection) -> Result<()> {
    ensure_backend(service)?;
    service.refresh(collection).await
}

/// Status is always printed, even when no engine is reachable.
async fn status(service: &DockerService, emit: &mut dyn FnMut(HeadlessEvent)) -> Result<()> {
    let backend = service.snapshot().backend;
    let metadata = if backend.is_available() {
        service.refresh_engine().await
    } else {
        Err(Error::SocketUnavailable)
    };

    let snapshot = service.snapshot();
    emit(HeadlessEvent::status(
        backend,
        snapshot.endpoint.as_ref().map(|e| e.socket_path.clone()),
        service.backend_settings().preference,
        snapshot.info.clone(),
        snapshot.version.clone(),
    ));
    metadata
}

/// Stream logs until the user interrupts. The subscription reconnects on
/// its own; connection trouble is reported as non-fatal events.
async fn follow_logs(
    service: Arc<DockerService>,
    args: LogsArgs,
    emit: &mut dyn FnMut(HeadlessEvent),
) -> Result<()> {
    let mut view = DetailView::open(service, args.id.as_str()).await?;
    let options = FollowOptions {
        backlog: args.tail,
        timestamps: args.timestamps,
        ..FollowOptions::default()
    };
    let subscription = view.follow_logs(options);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted, closing log stream for {}", args.id);
                break;
            }
            batch = subscription.next_batch(LOG_BATCH_WINDOW) => {
                let Some(batch) = batch else { break };
                for event in batch {
                    match event {
                        FollowEvent::Output(chunks) => {
                            for chunk in chunks {
                                emit(HeadlessEvent::log(&args.id, chunk));
                            }
                        }
                        FollowEvent::State(state) => {
                            emit(HeadlessEvent::log_state(&args.id, state));
                        }
                        FollowEvent::Failed(message) => {
                            emit(HeadlessEvent::error(message, false));
                        }
                    }
                }
            }
        }
    }

    view.close();
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutations
// ─────────────────────────────────────────────────────────────────────────────

async fn container_action(
    dispatcher: &ActionDispatcher,
    id: String,
    action: ContainerAction,
    emit: &mut dyn FnMut(HeadlessEvent),
) -> Result<()> {
    dispatch(dispatcher, Action::Container { id, action }, emit).await
}

async fn dispatch(
    dispatcher: &ActionDispatcher,
    action: Action,
    emit: &mut dyn FnMut(HeadlessEvent),
) -> Result<()> {
    let label = action.to_string();
    let outcome = dispatcher.dispatch(action).await?;
    emit(HeadlessEvent::action_completed(label, outcome));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Config commands work on the file as stored; CLI overrides never leak into it.
fn configure(
    config_dir: &Path,
    command: ConfigCommand,
    emit: &mut dyn FnMut(HeadlessEvent),
) -> Result<()> {
    let mut settings = load_settings(config_dir);
    match command {
        ConfigCommand::Show => {}
        ConfigCommand::SetBackend { preference } => {
            settings.backend.preference = preference;
            save_settings(config_dir, &settings)?;
        }
        ConfigCommand::SetSocket { path } => {
            settings.backend.custom_socket = path;
            save_settings(config_dir, &settings)?;
        }
    }
    emit(settings_event(config_dir, &settings));
    Ok(())
}

fn settings_event(config_dir: &Path, settings: &Settings) -> HeadlessEvent {
    HeadlessEvent::settings(
        settings_path(config_dir),
        settings.backend.preference,
        settings.backend.custom_socket.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwatch_app::{BackendSettings, SubscriptionState};
    use dockwatch_core::{Backend, BackendPreference, LogStreamKind};
    use dockwatch_engine::test_utils::{log_frame, FakeEngine, FakeResponse};
    use dockwatch_engine::{ResolverEnv, SocketResolver};
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn run_collect(
        service: Arc<DockerService>,
        config_dir: &Path,
        command: Command,
    ) -> (Result<()>, Vec<HeadlessEvent>) {
        let mut events = Vec::new();
        let result = run_command(service, config_dir, command, &mut |e| events.push(e)).await;
        (result, events)
    }

    fn service_for(engine: &FakeEngine) -> Arc<DockerService> {
        Arc::new(DockerService::with_endpoint(engine.endpoint()))
    }

    /// A service whose discovery finds nothing: empty home, missing system socket.
    fn unreachable_service(home: &Path) -> Arc<DockerService> {
        let resolver = SocketResolver::new(ResolverEnv::with_home(
            home,
            home.join("missing-docker.sock"),
        ));
        let service = DockerService::new(BackendSettings::default(), resolver, None);
        assert_eq!(service.resolve(), Backend::Unavailable);
        Arc::new(service)
    }

    #[tokio::test]
    async fn test_ps_lists_running_containers_only() {
        let engine = FakeEngine::with_sample_data().await;
        let dir = TempDir::new().unwrap();

        let (result, events) =
            run_collect(service_for(&engine), dir.path(), Command::Ps { all: false }).await;
        result.unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            HeadlessEvent::Container { name, ports, .. } => {
                assert_eq!(name, "web");
                assert_eq!(ports, &vec!["8080:80".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ps_all_includes_exited_containers() {
        let engine = FakeEngine::with_sample_data().await;
        let dir = TempDir::new().unwrap();

        let (result, events) =
            run_collect(service_for(&engine), dir.path(), Command::Ps { all: true }).await;
        result.unwrap();

        let names: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                HeadlessEvent::Container { name, exit_code, .. } => Some((name.clone(), *exit_code)),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![("web".to_string(), None), ("worker".to_string(), Some(1))]
        );
    }

    #[tokio::test]
    async fn test_status_reports_engine_metadata() {
        let engine = FakeEngine::with_sample_data().await;
        let dir = TempDir::new().unwrap();

        let (result, events) =
            run_collect(service_for(&engine), dir.path(), Command::Status).await;
        result.unwrap();

        match &events[0] {
            HeadlessEvent::Status {
                backend,
                info,
                version,
                ..
            } => {
                assert_eq!(*backend, Backend::Docker);
                assert_eq!(info.as_ref().unwrap().name, "colima");
                assert_eq!(version.as_ref().unwrap().api_version, "1.44");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_without_engine_still_reports() {
        let home = TempDir::new().unwrap();

        let (result, events) =
            run_collect(unreachable_service(home.path()), home.path(), Command::Status).await;

        assert!(matches!(result, Err(Error::SocketUnavailable)));
        match &events[0] {
            HeadlessEvent::Status {
                backend,
                socket_path,
                ..
            } => {
                assert_eq!(*backend, Backend::Unavailable);
                assert!(socket_path.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commands_fail_fast_without_socket() {
        let home = TempDir::new().unwrap();

        let (result, events) =
            run_collect(unreachable_service(home.path()), home.path(), Command::Images).await;

        assert!(matches!(result, Err(Error::SocketUnavailable)));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_logs_one_shot_emits_chunks() {
        let engine = FakeEngine::start().await;
        let mut body = log_frame(1, b"hello\n");
        body.extend(log_frame(2, b"oops\n"));
        engine.route("GET", "/containers/web/logs", FakeResponse::chunked(200, vec![body]));
        let dir = TempDir::new().unwrap();

        let command = Command::Logs(LogsArgs {
            id: "web".to_string(),
            follow: false,
            tail: 5,
            timestamps: false,
        });
        let (result, events) = run_collect(service_for(&engine), dir.path(), command).await;
        result.unwrap();

        let streams: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                HeadlessEvent::Log { stream, text, .. } => Some((*stream, text.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(
            streams,
            vec![
                (LogStreamKind::Stdout, "hello\n"),
                (LogStreamKind::Stderr, "oops\n")
            ]
        );
        let request = &engine.requests_to("/containers/web/logs")[0];
        assert_eq!(request.query("tail"), Some("5"));
        assert_eq!(request.query("follow"), Some("false"));
    }

    #[tokio::test]
    async fn test_logs_follow_streams_until_dropped() {
        let engine = FakeEngine::start().await;
        engine.route(
            "GET",
            "/containers/web/json",
            FakeResponse::json(200, r#"{"Id": "aaaa", "Name": "/web"}"#),
        );
        engine.route(
            "GET",
            "/containers/web/logs",
            FakeResponse::chunked(200, vec![log_frame(1, b"live\n")]).held_open(),
        );
        let dir = TempDir::new().unwrap();

        let command = Command::Logs(LogsArgs {
            id: "web".to_string(),
            follow: true,
            tail: 10,
            timestamps: false,
        });
        let mut events = Vec::new();
        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            run_command(service_for(&engine), dir.path(), command, &mut |e| {
                events.push(e)
            }),
        )
        .await;
        assert!(outcome.is_err(), "follow should keep running");

        assert!(events.iter().any(|e| matches!(
            e,
            HeadlessEvent::LogState {
                state: SubscriptionState::Streaming,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, HeadlessEvent::Log { text, .. } if text == "live\n")));
        engine
            .wait_for_closed(1, Duration::from_secs(2))
            .await
            .expect("log stream should close once the command is dropped");
    }

    #[tokio::test]
    async fn test_action_emits_completion() {
        let engine = FakeEngine::with_sample_data().await;
        engine.route("POST", "/containers/web/restart", FakeResponse::empty(204));
        let dir = TempDir::new().unwrap();

        let (result, events) = run_collect(
            service_for(&engine),
            dir.path(),
            Command::Restart {
                id: "web".to_string(),
            },
        )
        .await;
        result.unwrap();

        match &events[0] {
            HeadlessEvent::ActionCompleted { action, .. } => {
                assert_eq!(action, "restart container web")
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_action_returns_engine_message() {
        let engine = FakeEngine::with_sample_data().await;
        engine.route(
            "DELETE",
            "/images/nginx",
            FakeResponse::json(409, r#"{"message":"image is being used by running container"}"#),
        );
        let dir = TempDir::new().unwrap();

        let (result, events) = run_collect(
            service_for(&engine),
            dir.path(),
            Command::Rmi {
                id: "nginx".to_string(),
                force: false,
            },
        )
        .await;

        let err = tokio_test::assert_err!(result);
        assert_eq!(err.to_string(), "image is being used by running container");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_config_set_backend_persists() {
        let engine = FakeEngine::start().await;
        let dir = TempDir::new().unwrap();

        let (result, events) = run_collect(
            service_for(&engine),
            dir.path(),
            Command::Config(ConfigCommand::SetBackend {
                preference: BackendPreference::ForceColima,
            }),
        )
        .await;
        result.unwrap();

        assert_eq!(
            load_settings(dir.path()).backend.preference,
            BackendPreference::ForceColima
        );
        match &events[0] {
            HeadlessEvent::Settings { preference, .. } => {
                assert_eq!(*preference, BackendPreference::ForceColima)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(engine.requests().is_empty());
    }

    #[tokio::test]
    async fn test_config_set_socket_and_clear() {
        let engine = FakeEngine::start().await;
        let dir = TempDir::new().unwrap();
        let socket = PathBuf::from("/tmp/custom/docker.sock");

        run_collect(
            service_for(&engine),
            dir.path(),
            Command::Config(ConfigCommand::SetSocket {
                path: Some(socket.clone()),
            }),
        )
        .await
        .0
        .unwrap();
        assert_eq!(load_settings(dir.path()).backend.custom_socket, Some(socket));

        run_collect(
            service_for(&engine),
            dir.path(),
            Command::Config(ConfigCommand::SetSocket { path: None }),
        )
        .await
        .0
        .unwrap();
        assert_eq!(load_settings(dir.path()).backend.custom_socket, None);
    }
}
