//! Minimal HTTP endpoint serving the current RTC config and accepting actions.

use super::agent::ActionHandler;
use super::publisher::RtcConfigPublisher;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// How long a client may take to deliver its request.
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ConfigServer {
    listener: TcpListener,
    publisher: RtcConfigPublisher,
    actions: Arc<dyn ActionHandler>,
    read_timeout: Duration,
}

impl ConfigServer {
    pub async fn bind(
        host: &str,
        port: u16,
        publisher: RtcConfigPublisher,
        actions: Arc<dyn ActionHandler>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("RTC config endpoint listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            publisher,
            actions,
            read_timeout: REQUEST_READ_TIMEOUT,
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((socket, addr)) => {
                    debug!("config endpoint connection from {}", addr);
                    let publisher = self.publisher.clone();
                    let actions = Arc::clone(&self.actions);
                    let read_timeout = self.read_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, publisher, actions, read_timeout).await {
                            warn!("config endpoint request failed: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
        info!("RTC config endpoint stopped");
    }
}

/// Reads the request head and, when `Content-Length` is given, the body.
async fn read_request(socket: &mut TcpStream) -> std::io::Result<(String, String)> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let expected = content_length(&text[..end]);
            if buf.len() >= end + 4 + expected || buf.len() >= MAX_REQUEST_BYTES {
                break;
            }
        } else if buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf).into_owned();
    Ok(match text.split_once("\r\n\r\n") {
        Some((head, body)) => (head.to_string(), body.to_string()),
        None => (text, String::new()),
    })
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\n\
        Content-Type: {}\r\n\
        Content-Length: {}\r\n\
        Access-Control-Allow-Origin: *\r\n\
        Connection: close\r\n\
        \r\n\
        {}",
        status,
        content_type,
        body.len(),
        body
    )
}

async fn handle_connection(
    mut socket: TcpStream,
    publisher: RtcConfigPublisher,
    actions: Arc<dyn ActionHandler>,
    read_timeout: Duration,
) -> std::io::Result<()> {
    let (head, body) = tokio::time::timeout(read_timeout, read_request(&mut socket))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "request not received in time"))??;
    let request_line = head.lines().next().unwrap_or_default();

    let reply = if request_line.starts_with("GET /turn") {
        response("200 OK", "application/json", &publisher.current())
    } else if request_line.starts_with("GET /health") {
        response("200 OK", "text/plain", "OK")
    } else if request_line.starts_with("POST /action") {
        let handled = actions.on_action(&body).await;
        response(
            "200 OK",
            "application/json",
            &serde_json::json!({ "ok": handled }).to_string(),
        )
    } else {
        response("404 Not Found", "text/plain", "Not Found")
    };

    socket.write_all(reply.as_bytes()).await?;
    socket.shutdown().await
}
