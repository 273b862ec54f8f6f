use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{Auth, Msg, Session as SshSession};
use russh::{Channel, ChannelId, MethodSet};
use russh_keys::key::{KeyPair, PublicKey as SshPublicKey};
use russh_keys::PublicKeyBase64;
use tokio::net::TcpListener;
use tokio::sync::watch;

use common::crypto::{AuthorizedKey, SecretKey};

use super::commands::ControlPlane;
use super::session::SessionContext;

const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3600);
const AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SshServerError {
    #[error("an error occurred running the SSH server: {0}")]
    ServingFailed(#[from] std::io::Error),
}

fn server_config(host_key: &SecretKey) -> russh::server::Config {
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&host_key.to_bytes());
    russh::server::Config {
        methods: MethodSet::PUBLICKEY,
        inactivity_timeout: Some(INACTIVITY_TIMEOUT),
        auth_rejection_time: AUTH_REJECTION_TIME,
        auth_rejection_time_initial: Some(Duration::ZERO),
        keys: vec![KeyPair::Ed25519(signing_key)],
        ..Default::default()
    }
}

/// Bind `listen_addr` and serve SSH sessions until shutdown.
pub async fn run(
    listen_addr: SocketAddr,
    host_key: &SecretKey,
    plane: ControlPlane,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), SshServerError> {
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = ?listen_addr, "SSH server listening");
    serve(listener, host_key, plane, shutdown_rx).await
}

/// Serve SSH sessions on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    host_key: &SecretKey,
    plane: ControlPlane,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), SshServerError> {
    let config = Arc::new(server_config(host_key));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, remote_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("failed to accept ssh connection: {}", e);
                        continue;
                    }
                };
                let handler = Connection::new(plane.clone(), remote_addr);
                let config = config.clone();
                tokio::spawn(async move {
                    match russh::server::run_stream(config, socket, handler).await {
                        Ok(running) => {
                            if let Err(e) = running.await {
                                tracing::debug!(%remote_addr, "ssh session ended: {}", e);
                            }
                        }
                        Err(e) => tracing::debug!(%remote_addr, "ssh handshake failed: {}", e),
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("SSH server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Per-connection state: the authenticated key and the sessions it opened.
struct Connection {
    plane: ControlPlane,
    remote_addr: SocketAddr,
    public_key: Option<AuthorizedKey>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl Connection {
    fn new(plane: ControlPlane, remote_addr: SocketAddr) -> Self {
        Self {
            plane,
            remote_addr,
            public_key: None,
            channels: HashMap::new(),
        }
    }
}

#[async_trait]
impl russh::server::Handler for Connection {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &SshPublicKey,
    ) -> Result<Auth, Self::Error> {
        match AuthorizedKey::from_wire(&public_key.public_key_bytes()) {
            Ok(key) => {
                tracing::debug!(user, remote = %self.remote_addr, "public key accepted");
                self.public_key = Some(key);
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::debug!(remote = %self.remote_addr, "rejecting public key: {}", e);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut SshSession,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        let (Some(channel), Some(public_key)) =
            (self.channels.remove(&channel_id), self.public_key.clone())
        else {
            session.channel_failure(channel_id);
            return Ok(());
        };
        session.channel_success(channel_id);

        let ctx = SessionContext {
            public_key,
            remote_addr: self.remote_addr.to_string(),
            command: String::from_utf8_lossy(data).into_owned(),
        };
        let handle = session.handle();
        let plane = self.plane.clone();

        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(channel.into_stream());
            let exit_status = plane.run_session(ctx, reader, writer).await;
            if handle
                .exit_status_request(channel_id, exit_status)
                .await
                .is_err()
            {
                tracing::debug!("client left before the exit status was sent");
            }
            let _ = handle.close(channel_id).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_uses_host_key() {
        let host_key = SecretKey::generate();
        let config = server_config(&host_key);
        assert_eq!(config.keys.len(), 1);
        let public = config.keys[0].clone_public_key().unwrap();
        let wire = AuthorizedKey::from_wire(&public.public_key_bytes()).unwrap();
        assert_eq!(wire, AuthorizedKey::from(&host_key.public()));
    }
}
