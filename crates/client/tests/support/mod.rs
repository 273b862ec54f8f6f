//! Shared harness: a real HTTP data plane on an ephemeral port and the SSH
//! control plane driven in-process over duplex streams.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{duplex, split};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use charm_server::ssh::{ControlPlane, SessionContext};
use charm_server::{Database, ServiceSettings, ServiceState};
use client::{Client, ClientConfig, ClientError, ExecChannel, Identity, LinkEvent, Transport};
use common::crypto::SecretKey;
use common::protocol::LinkStatus;

pub struct DuplexTransport {
    plane: ControlPlane,
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn exec(&self, identity: &Identity, command: &str) -> Result<ExecChannel, ClientError> {
        let (server, client) = duplex(64 * 1024);
        let (server_read, server_write) = split(server);
        let (client_read, client_write) = split(client);

        let ctx = SessionContext {
            public_key: identity.public_key(),
            remote_addr: "127.0.0.1:50000".to_string(),
            command: command.to_string(),
        };
        let plane = self.plane.clone();
        tokio::spawn(async move { plane.run_session(ctx, server_read, server_write).await });

        Ok(ExecChannel::new(client_read, client_write))
    }
}

pub struct TestServer {
    pub state: ServiceState,
    pub plane: ControlPlane,
    pub http_addr: SocketAddr,
    shutdown: watch::Sender<()>,
    dirs: Mutex<Vec<TempDir>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_settings(ServiceSettings::default()).await
    }

    pub async fn with_link_timeout(link_timeout: Duration) -> Self {
        Self::with_settings(ServiceSettings {
            link_timeout,
            ..Default::default()
        })
        .await
    }

    pub async fn with_settings(settings: ServiceSettings) -> Self {
        let files = TempDir::new().unwrap();
        let state = ServiceState::new(
            Database::in_memory().await.unwrap(),
            &SecretKey::generate(),
            settings,
            files.path().to_path_buf(),
        )
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = watch::channel(());
        let http_state = state.clone();
        tokio::spawn(async move {
            charm_server::http_server::serve(listener, tracing::Level::DEBUG, http_state, shutdown_rx)
                .await
                .unwrap();
        });

        Self {
            plane: ControlPlane::new(state.clone()),
            state,
            http_addr,
            shutdown,
            dirs: Mutex::new(vec![files]),
        }
    }

    fn keep(&self, dir: TempDir) {
        self.dirs.lock().unwrap().push(dir);
    }

    pub fn config(&self) -> ClientConfig {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig {
            host: self.http_addr.ip().to_string(),
            http_port: self.http_addr.port(),
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        self.keep(dir);
        config
    }

    pub fn client_with(&self, config: ClientConfig) -> Arc<Client> {
        let transport = Arc::new(DuplexTransport {
            plane: self.plane.clone(),
        });
        Arc::new(Client::with_transport(config, transport).unwrap())
    }

    /// A client with a brand new identity.
    pub fn client(&self) -> Arc<Client> {
        self.client_with(self.config())
    }

    pub async fn account_of(&self, client: &Client) -> Option<String> {
        match self
            .state
            .database()
            .user_for_key(&client.identity().public_key(), false)
            .await
        {
            Ok(user) => Some(user.charm_id),
            Err(charm_server::StoreError::MissingUser) => None,
            Err(e) => panic!("store error: {}", e),
        }
    }

    /// Tokens are deleted just after the terminal status goes out.
    pub async fn token_consumed(&self, token: &str) -> bool {
        for _ in 0..50 {
            let owner = self.state.database().link_token_owner(token).await.unwrap();
            if owner.is_none() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Outcome of one handshake as seen by the generator and the requester.
pub struct LinkOutcome {
    pub token: String,
    pub generator: Result<LinkStatus, ClientError>,
    pub requester: Result<LinkStatus, ClientError>,
}

/// Run a full handshake, answering the approval prompt with `approve`.
pub async fn link(generator: &Arc<Client>, requester: &Arc<Client>, approve: bool) -> LinkOutcome {
    let (events, mut generator_events) = mpsc::channel(8);
    let gen = generator.clone();
    let gen_task = tokio::spawn(async move { gen.link_gen(events).await });

    let token = match generator_events.recv().await {
        Some(LinkEvent::TokenCreated(token)) => token,
        other => panic!("expected a token, got {:?}", other),
    };
    let responder = tokio::spawn(async move {
        while let Some(event) = generator_events.recv().await {
            if let LinkEvent::Requested { respond, .. } = event {
                let _ = respond.send(approve);
            }
        }
    });

    let (requester_events, _requester_rx) = mpsc::channel(8);
    let requester = requester.link(&token, requester_events).await;
    let generator = gen_task.await.unwrap();
    responder.await.unwrap();

    LinkOutcome {
        token,
        generator,
        requester,
    }
}
