//! Host-facing stdio transport.
//!
//! Accepts both framing styles MCP hosts use in the wild: line-delimited
//! JSON and `Content-Length` framed messages. Outgoing messages are always
//! line-delimited. The transport only handles framing; all policy lives in
//! the façade.

use rmcp::{
    service::{RoleServer, RxJsonRpcMessage, TxJsonRpcMessage},
    transport::Transport,
};
use std::io::Error;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::Mutex;

/// Server transport over any async reader/writer pair, tolerant of mixed
/// MCP framing styles.
#[derive(Clone)]
pub struct HostTransport<R, W> {
    reader: Arc<Mutex<R>>,
    writer: Arc<Mutex<W>>,
}

impl<R, W> HostTransport<R, W>
where
    R: AsyncBufRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

/// Stdio-bound host transport.
pub type StdioHostTransport = HostTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl StdioHostTransport {
    pub fn new_stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> Transport<RoleServer> for HostTransport<R, W>
where
    R: AsyncBufRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    type Error = Error;

    fn send(
        &mut self,
        msg: TxJsonRpcMessage<RoleServer>,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send + 'static {
        let writer = self.writer.clone();
        let json_res =
            serde_json::to_string(&msg).map_err(|e| Error::new(std::io::ErrorKind::InvalidData, e));

        async move {
            let mut json = json_res?;
            json.push('\n');
            let mut w = writer.lock().await;
            w.write_all(json.as_bytes()).await?;
            w.flush().await?;
            Ok(())
        }
    }

    fn receive(
        &mut self,
    ) -> impl std::future::Future<Output = Option<RxJsonRpcMessage<RoleServer>>> + Send {
        let reader = self.reader.clone();

        async move {
            let mut r = reader.lock().await;
            loop {
                let mut first_line = String::new();
                match r.read_line(&mut first_line).await {
                    Ok(0) => return None, // EOF
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(%error, "host transport read failed");
                        return None;
                    }
                }

                let message_body = if first_line.starts_with("Content-Length:") {
                    let len_str = first_line
                        .trim()
                        .strip_prefix("Content-Length:")
                        .unwrap_or("0")
                        .trim();
                    let content_len: usize = len_str.parse().unwrap_or(0);

                    // Skip remaining headers until the blank separator line.
                    loop {
                        let mut header = String::new();
                        if let Ok(n) = r.read_line(&mut header).await {
                            if n == 0 || header.trim().is_empty() {
                                break;
                            }
                        } else {
                            break;
                        }
                    }

                    let mut buf = vec![0u8; content_len];
                    if let Err(error) = r.read_exact(&mut buf).await {
                        tracing::warn!(%error, "failed to read framed body");
                        continue;
                    }
                    match String::from_utf8(buf) {
                        Ok(body) => body,
                        Err(error) => {
                            tracing::warn!(%error, "framed body is not UTF-8");
                            continue;
                        }
                    }
                } else {
                    first_line
                };

                if message_body.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str(&message_body) {
                    Ok(msg) => return Some(msg),
                    Err(error) => {
                        tracing::warn!(%error, "ignoring malformed host message");
                        continue;
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        // Flush buffered output so final notifications reach the host
        // before the transport is gone.
        let writer = self.writer.clone();
        let mut w = writer.lock().await;
        w.flush().await?;
        AsyncWriteExt::shutdown(&mut *w).await?;
        Ok(())
    }
}
