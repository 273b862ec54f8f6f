use std::str::SplitWhitespace;

use tokio::io::{AsyncRead, AsyncWrite};

use common::crypto::AuthorizedKey;
use common::protocol::{Auth, EncryptKey, ErrorMessage, Keys, PublicKeyRecord, UnlinkRequest};

use super::link::LinkError;
use super::session::{Session, SessionContext};
use crate::auth::TokenError;
use crate::database::StoreError;
use crate::ServiceState;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing command")]
    MissingCommand,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("session closed before the request was read")]
    Disconnected,
}

/// Dispatches exec commands arriving over authenticated SSH sessions.
#[derive(Clone)]
pub struct ControlPlane {
    state: ServiceState,
}

impl ControlPlane {
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Run one command to completion and return the exit status for the channel.
    pub async fn run_session<R, W>(&self, ctx: SessionContext, reader: R, writer: W) -> u32
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut session = Session::new(reader, writer);

        let status = match self.dispatch(&ctx, &mut session).await {
            Ok(()) => 0,
            Err(e) => {
                tracing::warn!(command = %ctx.command, "ssh command failed: {}", e);
                if let Err(write_err) = session.send(&ErrorMessage::new(&e)).await {
                    tracing::debug!("could not report error to client: {}", write_err);
                }
                1
            }
        };

        if let Err(e) = session.close().await {
            tracing::debug!("error closing session: {}", e);
        }
        status
    }

    async fn dispatch(
        &self,
        ctx: &SessionContext,
        session: &mut Session,
    ) -> Result<(), ControlError> {
        let mut words = ctx.command.split_whitespace();
        let command = words.next().ok_or(ControlError::MissingCommand)?;
        tracing::debug!(command, remote = %ctx.remote_addr, "ssh command");

        match command {
            "id" => self.id(ctx, session).await,
            "jwt" => self.jwt(ctx, words, session).await,
            "api-auth" => self.auth(ctx, session).await,
            "api-keys" => self.keys(ctx, session).await,
            "api-unlink" => self.unlink(ctx, session).await,
            "api-link" => match words.next() {
                Some(token) => self.link_request(ctx, token, session).await,
                None => self.link_generate(ctx, session).await,
            },
            other => Err(ControlError::UnknownCommand(other.to_string())),
        }
    }

    async fn id(&self, ctx: &SessionContext, session: &mut Session) -> Result<(), ControlError> {
        let user = self.state.database().user_for_key(&ctx.public_key, true).await?;
        session.send_line(&user.charm_id).await?;
        Ok(())
    }

    async fn jwt(
        &self,
        ctx: &SessionContext,
        audiences: SplitWhitespace<'_>,
        session: &mut Session,
    ) -> Result<(), ControlError> {
        let user = self.state.database().user_for_key(&ctx.public_key, true).await?;
        let audiences: Vec<String> = audiences.map(String::from).collect();
        let token = self.state.tokens().issue(&user.charm_id, &audiences)?;
        session.send_line(&token).await?;
        Ok(())
    }

    async fn auth(&self, ctx: &SessionContext, session: &mut Session) -> Result<(), ControlError> {
        let db = self.state.database();
        let user = db.user_for_key(&ctx.public_key, true).await?;
        let jwt = self.state.tokens().issue(&user.charm_id, &[])?;
        let encrypt_keys = db
            .encrypt_keys_for(&ctx.public_key)
            .await?
            .into_iter()
            .map(EncryptKey::from)
            .collect();

        session
            .send(&Auth {
                jwt,
                id: user.charm_id,
                http_scheme: self.state.settings().http_scheme.clone(),
                public_key: ctx.public_key.to_authorized(),
                encrypt_keys,
            })
            .await?;
        Ok(())
    }

    async fn keys(&self, ctx: &SessionContext, session: &mut Session) -> Result<(), ControlError> {
        let db = self.state.database();
        let user = db.user_for_key(&ctx.public_key, true).await?;
        let session_key = ctx.public_key.to_authorized();

        let keys: Vec<PublicKeyRecord> = db
            .keys_for_user(user.id)
            .await?
            .into_iter()
            .map(PublicKeyRecord::from)
            .collect();
        let active_key = keys
            .iter()
            .position(|k| k.key == session_key)
            .map(|i| i as i64)
            .unwrap_or(-1);

        session.send(&Keys { active_key, keys }).await?;
        Ok(())
    }

    async fn unlink(&self, ctx: &SessionContext, session: &mut Session) -> Result<(), ControlError> {
        let line = session.next_line().await.ok_or(ControlError::Disconnected)?;
        let request: UnlinkRequest = serde_json::from_str(&line)?;
        let key: AuthorizedKey = request
            .key
            .parse()
            .map_err(|e| ControlError::BadRequest(format!("{}", e)))?;

        let db = self.state.database();
        let user = db.user_for_key(&ctx.public_key, false).await?;
        db.unlink_key(user.id, &key).await?;
        tracing::info!(charm_id = %user.charm_id, "key unlinked");
        Ok(())
    }

    async fn link_generate(
        &self,
        ctx: &SessionContext,
        session: &mut Session,
    ) -> Result<(), ControlError> {
        let db = self.state.database();
        let user = db.user_for_key(&ctx.public_key, true).await?;
        self.state
            .links()
            .generate(db, &user, self.state.settings().link_timeout, session)
            .await?;
        Ok(())
    }

    async fn link_request(
        &self,
        ctx: &SessionContext,
        token: &str,
        session: &mut Session,
    ) -> Result<(), ControlError> {
        self.state.links().request(token, ctx, session).await?;
        Ok(())
    }
}
