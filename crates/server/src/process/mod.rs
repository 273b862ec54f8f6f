mod utils;

use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::http_server;
use crate::ssh::{self, ControlPlane};
use crate::{ServiceConfig, ServiceState};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

const LOG_FILE_PREFIX: &str = "charm-server.log";

fn env_filter(level: tracing::Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Compact stdout logging plus, when a log dir is configured, a daily
/// rolling file. The returned guards flush the writers on drop.
fn init_logging(service_config: &ServiceConfig) -> Vec<WorkerGuard> {
    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(env_filter(service_config.log_level));

    let file_layer = service_config.log_dir.as_ref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("warning: cannot create log directory {:?}: {}", log_dir, e);
            return None;
        }
        let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
        guards.push(file_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(env_filter(service_config.log_level)),
        )
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

async fn create_state(service_config: &ServiceConfig) -> ServiceState {
    match ServiceState::from_config(service_config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("cannot open identity store: {}", e);
            std::process::exit(3);
        }
    }
}

/// Wait for the shutdown signal, then give both planes a bounded time to stop.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            timeout_secs = FINAL_SHUTDOWN_TIMEOUT.as_secs(),
            "SSH or HTTP listener did not stop in time"
        );
        std::process::exit(4);
    }
}

/// Runs the SSH control plane and the HTTP data plane until SIGINT or SIGTERM.
pub async fn spawn_service(service_config: &ServiceConfig) {
    let _guards = init_logging(service_config);
    let grace = service_config.settings.link_timeout;
    let (graceful_waiter, shutdown_rx) = match utils::graceful_shutdown_blocker(grace) {
        Ok(blocker) => blocker,
        Err(e) => {
            tracing::error!("failed to install signal handlers: {}", e);
            std::process::exit(2);
        }
    };
    let state = create_state(service_config).await;

    let mut handles = Vec::new();

    let ssh_addr = service_config.ssh_listen_addr;
    let host_key = service_config.host_key.clone();
    let plane = ControlPlane::new(state.clone());
    let ssh_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = ssh::run(ssh_addr, &host_key, plane, ssh_rx).await {
            tracing::error!("SSH server error: {}", e);
        }
    }));

    let http_config = http_server::Config::from(service_config);
    let http_state = state.clone();
    let http_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_server::run(http_config, http_state, http_rx).await {
            tracing::error!("HTTP server error: {}", e);
        }
    }));

    tracing::info!(
        ssh = %service_config.ssh_listen_addr,
        http = %service_config.http_listen_addr,
        "charm server running"
    );

    shutdown_and_join(graceful_waiter, handles).await;
}
