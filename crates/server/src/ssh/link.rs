//! Link broker.
//!
//! A generator session allocates a token and parks on a rendezvous slot; a
//! requester session presenting the token drops its key into the slot and
//! waits for the outcome. One deadline, fixed when the token is created,
//! bounds both sides. Slots are reclaimed when the generator's session ends,
//! whatever the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout_at, Instant};

use common::crypto::AuthorizedKey;
use common::protocol::{
    LinkAnswer, LinkMessage, LinkResponse, LinkStatus, TOKEN_ALPHABET, TOKEN_LENGTH,
};

use super::session::{Session, SessionContext};
use crate::database::{Database, StoreError, UserRecord};

const MAX_TOKEN_ATTEMPTS: usize = 32;
/// Extra time a requester waits past the slot deadline for the generator's verdict.
const REQUESTER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("could not allocate a unique link token")]
    TokenSpace,
    #[error("random source failure: {0}")]
    Random(String),
    #[error("peer closed the session")]
    Disconnected,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct LinkRequest {
    public_key: AuthorizedKey,
    addr: String,
    outcome: oneshot::Sender<LinkStatus>,
}

struct Slot {
    requests: mpsc::Sender<LinkRequest>,
    deadline: Instant,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Removes the slot from the broker when the generator is done with it.
struct SlotGuard {
    slots: Slots,
    token: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.token);
    }
}

#[derive(Clone, Default)]
pub struct LinkBroker {
    slots: Slots,
}

impl std::fmt::Debug for LinkBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkBroker")
            .field("open_slots", &self.slots.lock().len())
            .finish()
    }
}

fn random_token() -> Result<String, LinkError> {
    let alphabet_len = TOKEN_ALPHABET.len();
    // largest multiple of the alphabet size that fits a byte, to avoid modulo bias
    let limit = (256 / alphabet_len * alphabet_len) as u8;

    let mut token = String::with_capacity(TOKEN_LENGTH);
    let mut buf = [0u8; 32];
    while token.len() < TOKEN_LENGTH {
        getrandom::getrandom(&mut buf).map_err(|e| LinkError::Random(e.to_string()))?;
        for b in buf {
            if b < limit && token.len() < TOKEN_LENGTH {
                token.push(TOKEN_ALPHABET[b as usize % alphabet_len] as char);
            }
        }
    }
    Ok(token)
}

impl LinkBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_slots(&self) -> usize {
        self.slots.lock().len()
    }

    async fn open_slot(
        &self,
        db: &Database,
        user_id: i64,
        deadline: Instant,
    ) -> Result<(String, mpsc::Receiver<LinkRequest>, SlotGuard), LinkError> {
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = random_token()?;
            if self.slots.lock().contains_key(&token) {
                continue;
            }
            if !db.create_link_token(&token, user_id).await? {
                continue;
            }

            let (tx, rx) = mpsc::channel(1);
            self.slots.lock().insert(
                token.clone(),
                Slot {
                    requests: tx,
                    deadline,
                },
            );
            let guard = SlotGuard {
                slots: self.slots.clone(),
                token: token.clone(),
            };
            return Ok((token, rx, guard));
        }
        Err(LinkError::TokenSpace)
    }

    /// Run the generator side of a link for `user` on `session`.
    pub async fn generate(
        &self,
        db: &Database,
        user: &UserRecord,
        link_timeout: Duration,
        session: &mut Session,
    ) -> Result<LinkStatus, LinkError> {
        let deadline = Instant::now() + link_timeout;
        if let Err(e) = db.purge_link_tokens(link_timeout.as_secs() as i64).await {
            tracing::warn!("failed to purge stale link tokens: {}", e);
        }

        let (token, requests, guard) = self.open_slot(db, user.id, deadline).await?;
        tracing::info!(charm_id = %user.charm_id, "link token created");

        let outcome = self
            .run_generator(db, user, &token, requests, deadline, session)
            .await;

        drop(guard);
        if let Err(e) = db.delete_link_token(&token).await {
            tracing::warn!("failed to delete link token: {}", e);
        }
        outcome
    }

    async fn run_generator(
        &self,
        db: &Database,
        user: &UserRecord,
        token: &str,
        mut requests: mpsc::Receiver<LinkRequest>,
        deadline: Instant,
        session: &mut Session,
    ) -> Result<LinkStatus, LinkError> {
        session
            .send(&LinkMessage::with_token(LinkStatus::TokenCreated, token))
            .await?;

        let request = loop {
            tokio::select! {
                request = requests.recv() => break request,
                _ = sleep_until(deadline) => break None,
                line = session.next_line() => match line {
                    Some(_) => continue,
                    None => return Err(LinkError::Disconnected),
                },
            }
        };
        // the token is single use: later requesters see it as invalid
        requests.close();
        self.slots.lock().remove(token);

        let Some(request) = request else {
            tracing::info!(charm_id = %user.charm_id, "link timed out waiting for requester");
            session
                .send(&LinkMessage::with_token(LinkStatus::TimedOut, token))
                .await?;
            return Ok(LinkStatus::TimedOut);
        };

        session
            .send(&LinkMessage {
                status: LinkStatus::Requested,
                token: Some(token.to_string()),
                request_public_key: Some(request.public_key.to_authorized()),
                request_addr: Some(request.addr.clone()),
            })
            .await?;

        let answer = loop {
            tokio::select! {
                line = session.next_line() => match line {
                    Some(line) => match serde_json::from_str::<LinkResponse>(&line) {
                        Ok(response) => break Some(response.response),
                        Err(e) => {
                            tracing::debug!("ignoring malformed link response: {}", e);
                            continue;
                        }
                    },
                    None => {
                        let _ = request.outcome.send(LinkStatus::Error);
                        return Err(LinkError::Disconnected);
                    }
                },
                _ = sleep_until(deadline) => break None,
            }
        };

        let status = match answer {
            None => LinkStatus::TimedOut,
            Some(LinkAnswer::No) => LinkStatus::RequestDenied,
            Some(LinkAnswer::Yes) => match approve(db, user, &request.public_key).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::error!("failed to apply link: {}", e);
                    LinkStatus::Error
                }
            },
        };
        tracing::info!(charm_id = %user.charm_id, %status, "link finished");

        let _ = request.outcome.send(status);
        session
            .send(&LinkMessage::with_token(status, token))
            .await?;
        Ok(status)
    }

    /// Run the requester side: present `token` with the session's key.
    pub async fn request(
        &self,
        token: &str,
        ctx: &SessionContext,
        session: &mut Session,
    ) -> Result<LinkStatus, LinkError> {
        let slot = self
            .slots
            .lock()
            .get(token)
            .map(|slot| (slot.requests.clone(), slot.deadline));

        let Some((requests, deadline)) = slot else {
            session
                .send(&LinkMessage::with_token(
                    LinkStatus::InvalidTokenRequest,
                    token,
                ))
                .await?;
            return Ok(LinkStatus::InvalidTokenRequest);
        };

        session
            .send(&LinkMessage::with_token(LinkStatus::ValidTokenRequest, token))
            .await?;

        let (outcome_tx, mut outcome_rx) = oneshot::channel();
        let request = LinkRequest {
            public_key: ctx.public_key.clone(),
            addr: ctx.remote_addr.clone(),
            outcome: outcome_tx,
        };

        let status = match timeout_at(deadline, requests.send(request)).await {
            Err(_) => LinkStatus::TimedOut,
            Ok(Err(_)) => LinkStatus::InvalidTokenRequest,
            Ok(Ok(())) => {
                session
                    .send(&LinkMessage::with_token(LinkStatus::Requested, token))
                    .await?;

                let mut input_open = true;
                loop {
                    tokio::select! {
                        outcome = &mut outcome_rx => break outcome.unwrap_or(LinkStatus::TimedOut),
                        _ = sleep_until(deadline + REQUESTER_GRACE) => break LinkStatus::TimedOut,
                        line = session.next_line(), if input_open => {
                            // a requester has nothing to say; EOF only means stdin is done
                            if line.is_none() {
                                input_open = false;
                            }
                        }
                    }
                }
            }
        };

        session
            .send(&LinkMessage::with_token(status, token))
            .await?;
        Ok(status)
    }
}

/// Apply an approved link of `key` to the generator's account.
async fn approve(
    db: &Database,
    user: &UserRecord,
    key: &AuthorizedKey,
) -> Result<LinkStatus, StoreError> {
    let owner = match db.user_for_key(key, false).await {
        Ok(owner) => Some(owner),
        Err(StoreError::MissingUser) => None,
        Err(e) => return Err(e),
    };
    apply_link(db, user, key, owner).await
}

/// Link `key` given the account last seen holding it.
///
/// The key may have been registered by another session since that lookup,
/// in which case the new owner is merged like any other.
async fn apply_link(
    db: &Database,
    user: &UserRecord,
    key: &AuthorizedKey,
    owner: Option<UserRecord>,
) -> Result<LinkStatus, StoreError> {
    let owner = match owner {
        Some(owner) => owner,
        None => match db.link_key(user.id, key).await {
            Ok(()) => return Ok(LinkStatus::Success),
            Err(StoreError::KeyOwnedElsewhere) => db.user_for_key(key, false).await?,
            Err(e) => return Err(e),
        },
    };
    if owner.id == user.id {
        return Ok(LinkStatus::SameUser);
    }
    db.merge_users(user.id, owner.id).await?;
    Ok(LinkStatus::Success)
}
