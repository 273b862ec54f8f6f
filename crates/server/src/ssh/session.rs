use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use common::crypto::AuthorizedKey;

/// Lines buffered between the session reader task and the command handler.
const INPUT_BUFFER: usize = 16;

/// Who is on the other end of a session, and what they asked for.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub public_key: AuthorizedKey,
    pub remote_addr: String,
    pub command: String,
}

/// Newline-delimited JSON over one SSH channel.
///
/// Input is pumped by a separate task into a channel so that command
/// handlers can wait on it inside `select!` alongside timers and the link
/// broker without losing partially read lines.
pub struct Session {
    input: mpsc::Receiver<String>,
    output: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Session {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(INPUT_BUFFER);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("session input closed: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            input: rx,
            output: Box::new(writer),
        }
    }

    /// Next input line, or `None` once the peer closed its side.
    pub async fn next_line(&mut self) -> Option<String> {
        self.input.recv().await
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), std::io::Error> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.output.write_all(&line).await?;
        self.output.flush().await
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        self.output.write_all(line.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }

    pub async fn close(mut self) -> Result<(), std::io::Error> {
        self.output.shutdown().await
    }
}
