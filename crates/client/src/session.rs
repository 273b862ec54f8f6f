use std::any::Any;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use common::protocol::ErrorMessage;

use crate::error::ClientError;
use crate::transport::ExecChannel;

/// Client end of a control plane command: newline-delimited JSON both ways.
///
/// A server-side failure arrives as a single `{"error": ..}` line and is
/// surfaced as [`ClientError::Server`].
pub struct CommandSession {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl CommandSession {
    pub fn new(channel: ExecChannel) -> Self {
        let (reader, writer, guard) = channel.into_parts();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
            _guard: guard,
        }
    }

    /// Next raw line, `None` once the server closed the channel.
    pub async fn next_line(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    if let Some(message) = server_error(&line) {
                        return Err(ClientError::Server(message));
                    }
                    return Ok(Some(line));
                }
                None => return Ok(None),
            }
        }
    }

    pub async fn line(&mut self) -> Result<String, ClientError> {
        self.next_line().await?.ok_or(ClientError::UnexpectedEof)
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ClientError> {
        let line = self.line().await?;
        Ok(serde_json::from_str(&line)?)
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ClientError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read until the server closes the channel, surfacing a trailing error line.
    pub async fn finish(mut self) -> Result<(), ClientError> {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("error closing ssh input: {}", e);
        }
        while self.next_line().await?.is_some() {}
        Ok(())
    }
}

fn server_error(line: &str) -> Option<String> {
    if !line.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    serde_json::from_value::<ErrorMessage>(value)
        .ok()
        .map(|m| m.error)
}
