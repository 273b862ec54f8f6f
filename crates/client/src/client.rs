use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use reqwest::StatusCode;
use time::OffsetDateTime;

use common::name::validate_name;
use common::protocol::{Auth, Claims, Keys, News, NewsSummary, SetNameRequest, UnlinkRequest, User};

use crate::api::{
    GetBioRequest, GetNewsRequest, GetSeqRequest, GetUserRequest, HttpApi, ListNewsRequest,
    NextSeqRequest,
};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::identity::Identity;
use crate::ring::Ring;
use crate::session::CommandSession;
use crate::transport::{RusshTransport, Transport};

/// Refetch tokens this long before they expire.
const JWT_EXPIRY_MARGIN: Duration = Duration::from_secs(10);

struct CachedAuth {
    auth: Auth,
    expires_at: OffsetDateTime,
}

impl CachedAuth {
    fn new(auth: Auth) -> Result<Self, ClientError> {
        let claims = decode_claims(&auth.jwt)?;
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|e| ClientError::Auth(format!("bad token expiry: {}", e)))?;
        Ok(Self { auth, expires_at })
    }

    fn is_fresh(&self) -> bool {
        OffsetDateTime::now_utc() + JWT_EXPIRY_MARGIN < self.expires_at
    }
}

/// Read the claims of a token without checking its signature; the server
/// does that.
fn decode_claims(jwt: &str) -> Result<Claims, ClientError> {
    let payload = jwt
        .split('.')
        .nth(1)
        .ok_or_else(|| ClientError::Auth("malformed token".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ClientError::Auth(format!("malformed token: {}", e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// A charm account as seen from one device.
pub struct Client {
    config: ClientConfig,
    data_dir: PathBuf,
    identity: Identity,
    transport: Arc<dyn Transport>,
    pub(crate) http: HttpApi,
    auth: tokio::sync::Mutex<Option<CachedAuth>>,
    pub(crate) ring: parking_lot::Mutex<Ring>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("data_dir", &self.data_dir)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect over SSH with the identity from `config`, creating one if needed.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = RusshTransport::new(config.host.clone(), config.ssh_port);
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)?;
        let identity = Identity::load_or_create(&config)?;
        let http = HttpApi::new(&config.http_url()?)?;

        Ok(Self {
            config,
            data_dir,
            identity,
            transport,
            http,
            auth: tokio::sync::Mutex::new(None),
            ring: parking_lot::Mutex::new(Ring::default()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) async fn exec(&self, command: &str) -> Result<CommandSession, ClientError> {
        let channel = self.transport.exec(&self.identity, command).await?;
        Ok(CommandSession::new(channel))
    }

    /// The account id, creating the account on first contact.
    pub async fn id(&self) -> Result<String, ClientError> {
        let mut session = self.exec("id").await?;
        let id = session.line().await.map_err(store_error)?;
        session.finish().await?;
        Ok(id.trim().to_string())
    }

    /// Current auth, refetched when the cached token is about to expire.
    ///
    /// Every fetch also brings the encrypt-key ring up to date.
    pub async fn auth(&self) -> Result<Auth, ClientError> {
        let mut cached = self.auth.lock().await;
        if let Some(current) = cached.as_ref().filter(|c| c.is_fresh()) {
            return Ok(current.auth.clone());
        }

        let mut session = self.exec("api-auth").await?;
        let auth: Auth = session.recv().await.map_err(store_error)?;
        session.finish().await?;

        self.load_ring(&auth).await?;
        let fresh = CachedAuth::new(auth)?;
        let auth = fresh.auth.clone();
        *cached = Some(fresh);
        Ok(auth)
    }

    pub async fn jwt(&self) -> Result<String, ClientError> {
        Ok(self.auth().await?.jwt)
    }

    /// A token for other audiences. Never cached.
    pub async fn jwt_for(&self, audiences: &[&str]) -> Result<String, ClientError> {
        let command = std::iter::once("jwt")
            .chain(audiences.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let mut session = self.exec(&command).await?;
        let jwt = session.line().await.map_err(store_error)?;
        session.finish().await?;
        Ok(jwt.trim().to_string())
    }

    /// Drop the cached token so the next call reloads auth and the ring.
    pub async fn invalidate_auth(&self) {
        self.auth.lock().await.take();
    }

    pub async fn authorized_keys(&self) -> Result<Keys, ClientError> {
        let mut session = self.exec("api-keys").await?;
        let keys: Keys = session.recv().await.map_err(store_error)?;
        session.finish().await?;
        Ok(keys)
    }

    pub async fn unlink_key(&self, key: &str) -> Result<(), ClientError> {
        let mut session = self.exec("api-unlink").await?;
        session
            .send(&UnlinkRequest {
                key: key.to_string(),
            })
            .await?;
        session.finish().await.map_err(store_error)?;
        self.invalidate_auth().await;
        Ok(())
    }

    /// This account's profile.
    pub async fn bio(&self) -> Result<User, ClientError> {
        let auth = self.auth().await?;
        let request = GetUserRequest { charm_id: auth.id };
        self.http
            .call(request, &auth.jwt)
            .await
            .map_err(user_error)
    }

    pub async fn user_by_name(&self, name: &str) -> Result<User, ClientError> {
        let jwt = self.jwt().await?;
        let request = GetBioRequest {
            name: name.to_string(),
        };
        self.http.call(request, &jwt).await.map_err(user_error)
    }

    pub async fn set_name(&self, name: &str) -> Result<User, ClientError> {
        if !validate_name(name) {
            return Err(ClientError::NameInvalid);
        }
        let jwt = self.jwt().await?;
        let request = SetNameRequest {
            name: name.to_string(),
        };
        self.http.call(request, &jwt).await.map_err(user_error)
    }

    pub async fn get_seq(&self, name: &str) -> Result<u64, ClientError> {
        let jwt = self.jwt().await?;
        let request = GetSeqRequest {
            name: name.to_string(),
        };
        Ok(self.http.call(request, &jwt).await?.seq)
    }

    /// Advance the named sequence and return the new value.
    pub async fn next_seq(&self, name: &str) -> Result<u64, ClientError> {
        let jwt = self.jwt().await?;
        let request = NextSeqRequest {
            name: name.to_string(),
        };
        Ok(self.http.call(request, &jwt).await?.seq)
    }

    pub async fn news(&self, tags: &[&str], page: u32) -> Result<Vec<NewsSummary>, ClientError> {
        let jwt = self.jwt().await?;
        let request = ListNewsRequest {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            page,
        };
        self.http.call(request, &jwt).await
    }

    pub async fn news_item(&self, id: i64) -> Result<News, ClientError> {
        let jwt = self.jwt().await?;
        self.http
            .call(GetNewsRequest { id }, &jwt)
            .await
            .map_err(|e| match e {
                ClientError::HttpStatus(StatusCode::NOT_FOUND, _) => ClientError::NotFound,
                e => e,
            })
    }
}

/// Recognise identity store failures reported over SSH.
fn store_error(e: ClientError) -> ClientError {
    match e {
        ClientError::Server(message) => match message.as_str() {
            "user not found" => ClientError::MissingUser,
            "could not unlink key" => ClientError::CouldNotUnlinkKey,
            "name already taken" => ClientError::NameTaken,
            "invalid name" => ClientError::NameInvalid,
            _ => ClientError::Server(message),
        },
        e => e,
    }
}

fn user_error(e: ClientError) -> ClientError {
    match e {
        ClientError::HttpStatus(StatusCode::NOT_FOUND, _) => ClientError::MissingUser,
        ClientError::HttpStatus(StatusCode::CONFLICT, _) => ClientError::NameTaken,
        ClientError::HttpStatus(StatusCode::BAD_REQUEST, _) => ClientError::NameInvalid,
        e => e,
    }
}
