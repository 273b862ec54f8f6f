//! Client half of the linking handshake.
//!
//! Progress is reported on an mpsc channel. When the server asks the
//! generating side to approve a request, the [`LinkEvent::Requested`] event
//! carries a oneshot sender for the answer; dropping it denies the request.

use tokio::sync::{mpsc, oneshot};

use common::protocol::{LinkMessage, LinkResponse, LinkStatus};

use crate::client::Client;
use crate::error::ClientError;

#[derive(Debug)]
pub enum LinkEvent {
    /// The token to hand to the other device
    TokenCreated(String),
    /// The server accepted our token and forwarded the request
    ValidToken,
    /// Someone presented our token and waits for an answer
    Requested {
        public_key: String,
        addr: String,
        respond: oneshot::Sender<bool>,
    },
    Finished(LinkStatus),
}

async fn emit(events: &mpsc::Sender<LinkEvent>, event: LinkEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("link event receiver dropped");
    }
}

impl Client {
    /// Generate a link token and wait for another device to use it.
    pub async fn link_gen(&self, events: mpsc::Sender<LinkEvent>) -> Result<LinkStatus, ClientError> {
        // have a ring to hand out before anyone joins
        self.auth().await?;

        let mut session = self.exec("api-link").await?;
        loop {
            let message: LinkMessage = session.recv().await?;
            match message.status {
                LinkStatus::TokenCreated => {
                    let token = message
                        .token
                        .ok_or_else(|| ClientError::Link("token missing from server".to_string()))?;
                    tracing::info!(token = %token, "link token created");
                    emit(&events, LinkEvent::TokenCreated(token)).await;
                }
                LinkStatus::Requested => {
                    let (respond, mut answer) = oneshot::channel();
                    emit(
                        &events,
                        LinkEvent::Requested {
                            public_key: message.request_public_key.unwrap_or_default(),
                            addr: message.request_addr.unwrap_or_default(),
                            respond,
                        },
                    )
                    .await;
                    // the server may end the link while the answer is pending
                    let approved = loop {
                        tokio::select! {
                            approved = &mut answer => break approved.unwrap_or(false),
                            message = session.recv::<LinkMessage>() => {
                                let status = message?.status;
                                if status.is_terminal() {
                                    return self.finish_link_gen(status, &events).await;
                                }
                                tracing::debug!(%status, "link progress while awaiting approval");
                            }
                        }
                    };
                    session.send(&LinkResponse::approve(approved)).await?;
                }
                status if status.is_terminal() => {
                    return self.finish_link_gen(status, &events).await;
                }
                status => tracing::debug!(%status, "link progress"),
            }
        }
    }

    async fn finish_link_gen(
        &self,
        status: LinkStatus,
        events: &mpsc::Sender<LinkEvent>,
    ) -> Result<LinkStatus, ClientError> {
        emit(events, LinkEvent::Finished(status)).await;
        if status == LinkStatus::Success {
            self.sync_encrypt_keys().await?;
        }
        link_result(status)
    }

    /// Join the account that generated `token`.
    pub async fn link(
        &self,
        token: &str,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<LinkStatus, ClientError> {
        let mut session = self.exec(&format!("api-link {}", token)).await?;
        loop {
            let message: LinkMessage = session.recv().await?;
            match message.status {
                LinkStatus::ValidTokenRequest => emit(&events, LinkEvent::ValidToken).await,
                status if status.is_terminal() => {
                    emit(&events, LinkEvent::Finished(status)).await;
                    if status == LinkStatus::Success {
                        // a merge dropped our old ciphertexts, seal what we hold to the new account
                        let holds_keys = !self.ring.lock().is_empty();
                        self.invalidate_auth().await;
                        if holds_keys {
                            self.sync_encrypt_keys().await?;
                        }
                    }
                    return link_result(status);
                }
                status => tracing::debug!(%status, "link progress"),
            }
        }
    }
}

fn link_result(status: LinkStatus) -> Result<LinkStatus, ClientError> {
    match status {
        LinkStatus::Success | LinkStatus::SameUser => Ok(status),
        LinkStatus::TimedOut => Err(ClientError::LinkTimeout),
        LinkStatus::RequestDenied => Err(ClientError::LinkDenied),
        LinkStatus::InvalidTokenRequest => Err(ClientError::LinkInvalidToken),
        status => Err(ClientError::Link(status.to_string())),
    }
}
