use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use common::protocol::{
    EncryptKey, EncryptKeyUpload, ErrorMessage, News, NewsSummary, SeqResponse, SetNameRequest,
    User,
};

use crate::error::ClientError;

/// A data plane call: where it goes and what comes back.
pub(crate) trait ApiRequest {
    type Response: DeserializeOwned;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpApi {
    remote: Url,
    client: Client,
}

impl HttpApi {
    pub fn new(remote: &Url) -> Result<Self, ClientError> {
        let client = Client::builder().build()?;
        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    pub async fn call<T: ApiRequest>(&self, request: T, jwt: &str) -> Result<T::Response, ClientError> {
        let response = request
            .build_request(&self.remote, &self.client)?
            .bearer_auth(jwt)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<T::Response>().await?)
    }

    /// Send a hand-built request, mapping failures the same way as [`HttpApi::call`].
    pub async fn send(&self, request: RequestBuilder, jwt: &str) -> Result<Response, ClientError> {
        check_status(request.bearer_auth(jwt).send().await?).await
    }

    pub fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        Ok(segment_url(&self.remote, segments)?)
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await?;
    let message = serde_json::from_str::<ErrorMessage>(&text)
        .map(|m| m.error)
        .unwrap_or(text);
    match status {
        StatusCode::UNAUTHORIZED => Err(ClientError::Auth(message)),
        _ => Err(ClientError::HttpStatus(status, message)),
    }
}

fn segment_url(base_url: &Url, segments: &[&str]) -> Result<Url, url::ParseError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) struct GetUserRequest {
    pub charm_id: String,
}

impl ApiRequest for GetUserRequest {
    type Response = User;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.get(segment_url(base_url, &["v1", "id", &self.charm_id])?))
    }
}

pub(crate) struct GetBioRequest {
    pub name: String,
}

impl ApiRequest for GetBioRequest {
    type Response = User;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.get(segment_url(base_url, &["v1", "bio", &self.name])?))
    }
}

impl ApiRequest for SetNameRequest {
    type Response = User;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.post(segment_url(base_url, &["v1", "bio"])?).json(&self))
    }
}

impl ApiRequest for EncryptKeyUpload {
    type Response = EncryptKey;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        Ok(client
            .post(segment_url(base_url, &["v1", "encrypt-key"])?)
            .json(&self))
    }
}

pub(crate) struct GetSeqRequest {
    pub name: String,
}

impl ApiRequest for GetSeqRequest {
    type Response = SeqResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.get(segment_url(base_url, &["v1", "seq", &self.name])?))
    }
}

pub(crate) struct NextSeqRequest {
    pub name: String,
}

impl ApiRequest for NextSeqRequest {
    type Response = SeqResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.post(segment_url(base_url, &["v1", "seq", &self.name])?))
    }
}

pub(crate) struct ListNewsRequest {
    pub tags: Vec<String>,
    pub page: u32,
}

impl ApiRequest for ListNewsRequest {
    type Response = Vec<NewsSummary>;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        let mut url = segment_url(base_url, &["v1", "news"])?;
        url.query_pairs_mut()
            .append_pair("page", &self.page.to_string());
        if !self.tags.is_empty() {
            url.query_pairs_mut()
                .append_pair("tags", &self.tags.join(","));
        }
        Ok(client.get(url))
    }
}

pub(crate) struct GetNewsRequest {
    pub id: i64,
}

impl ApiRequest for GetNewsRequest {
    type Response = News;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.get(segment_url(base_url, &["v1", "news", &self.id.to_string()])?))
    }
}
