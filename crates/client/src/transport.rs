use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh_keys::key;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ClientError;
use crate::identity::Identity;

const SSH_USER: &str = "charm";
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Both halves of one exec channel.
pub struct ExecChannel {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    // whatever keeps the underlying connection open
    guard: Option<Box<dyn Any + Send>>,
}

pub(crate) type ChannelParts = (
    Box<dyn AsyncRead + Send + Unpin>,
    Box<dyn AsyncWrite + Send + Unpin>,
    Option<Box<dyn Any + Send>>,
);

impl ExecChannel {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            guard: None,
        }
    }

    /// Keep `guard` alive for as long as the channel is in use.
    pub fn with_guard(mut self, guard: impl Any + Send) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    pub(crate) fn into_parts(self) -> ChannelParts {
        (self.reader, self.writer, self.guard)
    }
}

/// Runs control plane commands as `identity`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exec(&self, identity: &Identity, command: &str) -> Result<ExecChannel, ClientError>;
}

/// One SSH connection per command.
#[derive(Debug, Clone)]
pub struct RusshTransport {
    host: String,
    port: u16,
}

impl RusshTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

struct HostKeyLogger;

#[async_trait]
impl client::Handler for HostKeyLogger {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            fingerprint = %server_public_key.fingerprint(),
            "server host key"
        );
        Ok(true)
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn exec(&self, identity: &Identity, command: &str) -> Result<ExecChannel, ClientError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            ..Default::default()
        });
        let mut handle =
            client::connect(config, (self.host.as_str(), self.port), HostKeyLogger).await?;

        let signing_key = ed25519_dalek::SigningKey::from_bytes(&identity.secret().to_bytes());
        let authenticated = handle
            .authenticate_publickey(SSH_USER, Arc::new(key::KeyPair::Ed25519(signing_key)))
            .await?;
        if !authenticated {
            return Err(ClientError::Auth(format!(
                "public key rejected by {}:{}",
                self.host, self.port
            )));
        }

        let channel = handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        tracing::debug!(host = %self.host, command, "ssh exec");

        let (reader, writer) = tokio::io::split(channel.into_stream());
        Ok(ExecChannel::new(reader, writer).with_guard(handle))
    }
}
