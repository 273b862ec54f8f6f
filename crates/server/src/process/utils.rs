use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Resolves on SIGINT right away, or on SIGTERM after `grace`, so link
/// handshakes already waiting on a device can run out their timeout.
pub fn graceful_shutdown_blocker(
    grace: Duration,
) -> std::io::Result<(JoinHandle<()>, watch::Receiver<()>)> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let (tx, rx) = watch::channel(());

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("SIGINT received, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!(grace_secs = grace.as_secs(), "SIGTERM received, draining");
                tokio::time::sleep(grace).await;
            }
        }

        let _ = tx.send(());
    });

    Ok((handle, rx))
}

pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

pub fn report_build_info() {
    let build = common::prelude::build_info();

    tracing::info!(
        build_profile = ?build.build_profile,
        build_timestamp = ?build.build_timestamp,
        version = ?build.version,
        "charm server starting up"
    );
}
