//! HTTP control server for the Brocker daemon
//!
//! A minimal HTTP/1.1 listener; each connection carries one request.

use super::api::{reason_phrase, ApiHandler, ApiResponse};
use crate::error::{BrockerError, Result};
use crate::orchestrator::Orchestrator;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Upper bound on accepted request bodies
const MAX_BODY: usize = 1024 * 1024;

/// Brocker daemon - control listener in front of the orchestrator
pub struct BrockerDaemon {
    listener: TcpListener,
    api_handler: ApiHandler,
}

impl BrockerDaemon {
    /// Bind the control listener
    pub async fn bind(addr: &str, orchestrator: Orchestrator) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BrockerError::Daemon(format!("Cannot listen on {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            api_handler: ApiHandler::new(orchestrator),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        info!("Brocker daemon listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let api_handler = self.api_handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, api_handler).await {
                            error!("Error handling connection from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Handle a single connection
async fn handle_connection<S>(stream: S, api_handler: ApiHandler) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    debug!("Received request: {}", request_line.trim());

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        let response = ApiResponse::from(bad_request("malformed request line"));
        return send_response(reader.get_mut(), &response).await;
    }
    let method = parts[0].to_string();
    let path = parts[1].to_string();

    let mut content_length = 0;
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).await? == 0 || header_line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header_line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    if content_length > MAX_BODY {
        let response = ApiResponse::from(bad_request("request body too large"));
        return send_response(reader.get_mut(), &response).await;
    }

    let body = if content_length > 0 {
        let mut buf = vec![0u8; content_length];
        reader.read_exact(&mut buf).await?;
        String::from_utf8_lossy(&buf).to_string()
    } else {
        String::new()
    };

    // Stopping shells out to the executor; keep it off the async workers.
    let response =
        tokio::task::spawn_blocking(move || api_handler.handle_request(&method, &path, &body))
            .await
            .map_err(|e| BrockerError::Daemon(format!("Request handler failed: {}", e)))?;

    send_response(reader.get_mut(), &response).await
}

fn bad_request(message: &str) -> BrockerError {
    BrockerError::Validation(message.to_string())
}

/// Send HTTP response
async fn send_response<W>(stream: &mut W, response: &ApiResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        response.status,
        reason_phrase(response.status),
        response.content_type,
        response.body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
