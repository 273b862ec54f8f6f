use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use common::protocol::FileInfo;

use crate::client::Client;
use crate::error::ClientError;

/// What a path in the account's file store holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    File(Vec<u8>),
    Dir(Vec<FileInfo>),
}

/// Split a store path into URL segments, refusing anything that could
/// escape the account root.
fn path_segments(path: &str) -> Result<Vec<&str>, ClientError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(ClientError::BadPath(path.to_string()));
    }
    Ok(segments)
}

fn fs_error(path: &str, e: ClientError) -> ClientError {
    match e {
        ClientError::HttpStatus(StatusCode::NOT_FOUND, _) => ClientError::NotFound,
        ClientError::HttpStatus(StatusCode::BAD_REQUEST, _) => ClientError::BadPath(path.to_string()),
        e => e,
    }
}

impl Client {
    fn fs_url(&self, path: &str) -> Result<url::Url, ClientError> {
        let mut segments = vec!["v1", "fs"];
        segments.extend(path_segments(path)?);
        self.http.url(&segments)
    }

    pub async fn read_file(&self, path: &str) -> Result<FileContent, ClientError> {
        let url = self.fs_url(path)?;
        let jwt = self.jwt().await?;
        let response = self
            .http
            .send(self.http.http_client().get(url), &jwt)
            .await
            .map_err(|e| fs_error(path, e))?;

        let is_listing = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if is_listing {
            Ok(FileContent::Dir(response.json().await?))
        } else {
            Ok(FileContent::File(response.bytes().await?.to_vec()))
        }
    }

    /// Store `data` at `path`, creating parent directories.
    pub async fn write_file(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: Option<u32>,
    ) -> Result<(), ClientError> {
        let mut url = self.fs_url(path)?;
        if let Some(mode) = mode {
            url.query_pairs_mut().append_pair("mode", &format!("{:o}", mode));
        }
        let file_name = path_segments(path)?
            .last()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let form = Form::new().part("data", Part::bytes(data).file_name(file_name));

        let jwt = self.jwt().await?;
        self.http
            .send(self.http.http_client().post(url).multipart(form), &jwt)
            .await
            .map_err(|e| fs_error(path, e))?;
        tracing::debug!(path, "file uploaded");
        Ok(())
    }

    pub async fn remove_file(&self, path: &str) -> Result<(), ClientError> {
        let url = self.fs_url(path)?;
        let jwt = self.jwt().await?;
        self.http
            .send(self.http.http_client().delete(url), &jwt)
            .await
            .map_err(|e| fs_error(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments("/a//b/c.txt").unwrap(), vec!["a", "b", "c.txt"]);
        assert!(matches!(path_segments("../etc/passwd"), Err(ClientError::BadPath(_))));
        assert!(matches!(path_segments("a/./b"), Err(ClientError::BadPath(_))));
        assert!(matches!(path_segments("//"), Err(ClientError::BadPath(_))));
    }
}
