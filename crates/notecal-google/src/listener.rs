//! Loopback redirect listener.
//!
//! An event-driven HTTP acceptor bound to a fixed local port for the lifetime
//! of one authorization attempt. Each connection's request head is read on
//! its own task, so an idle or slow client never holds up the redirect. The
//! first request on the callback path is answered and ends the attempt;
//! everything else gets a plain error status and is ignored.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::page::{failure_page, status_page, success_page};

/// Deadline for a client to send its request head.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the request line plus headers.
const MAX_HEAD_BYTES: u64 = 16 * 1024;

/// First pause after a failed `accept`.
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Longest pause between `accept` retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Query parameters carried by the provider's redirect.
///
/// Empty values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// The authorization code.
    pub code: Option<String>,
    /// The echoed state parameter.
    pub state: Option<String>,
    /// The provider's error value, e.g. `access_denied`.
    pub error: Option<String>,
}

impl CallbackParams {
    /// Parses an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// The bound redirect listener for one attempt.
///
/// Dropping the value closes the socket and releases the port.
#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    callback_path: String,
}

impl LoopbackListener {
    /// Binds `127.0.0.1:port`.
    ///
    /// Fails immediately with [`AuthError::Bind`] if the port is taken.
    pub async fn bind(port: u16, callback_path: impl Into<String>) -> AuthResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| AuthError::Bind { port, source })?;

        info!(port, "loopback listener bound");

        Ok(Self {
            listener,
            callback_path: callback_path.into(),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the redirect, validates it and answers the browser.
    ///
    /// `validate` turns the callback parameters into the authorization code
    /// or an error; its outcome selects the page served and is returned.
    /// The listener is consumed and closed before this returns, and any
    /// connections still being read are dropped.
    pub async fn accept_callback<F>(self, mut validate: F) -> AuthResult<String>
    where
        F: FnMut(&CallbackParams) -> AuthResult<String>,
    {
        let callback_path: Arc<str> = Arc::from(self.callback_path.as_str());
        let mut pending = JoinSet::new();
        let mut accept_failures = 0u32;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept_failures = 0;
                        debug!(%peer, "accepted connection");
                        pending.spawn(route_request(stream, Arc::clone(&callback_path)));
                    }
                    Err(e) => {
                        let pause = accept_backoff(accept_failures);
                        accept_failures = accept_failures.saturating_add(1);
                        warn!(error = %e, ?pause, "failed to accept connection");
                        tokio::time::sleep(pause).await;
                    }
                },
                Some(joined) = pending.join_next() => {
                    let Ok(Some((params, mut stream))) = joined else {
                        continue;
                    };

                    let outcome = validate(&params);
                    let page = match outcome {
                        Ok(_) => success_page(),
                        Err(ref e) => failure_page(&e.to_string()),
                    };
                    write_response(&mut stream, &page).await;

                    debug!("callback handled, closing listener");
                    return outcome;
                }
            }
        }
    }
}

/// Pause before the next `accept` after `failures` consecutive errors.
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << failures.min(7))
        .min(ACCEPT_BACKOFF_MAX)
}

/// Reads one request and answers anything that is not the callback.
///
/// Returns the callback parameters and the open stream for the callback
/// request only.
async fn route_request(
    stream: TcpStream,
    callback_path: Arc<str>,
) -> Option<(CallbackParams, TcpStream)> {
    let (request_line, mut stream) =
        match tokio::time::timeout(READ_TIMEOUT, read_head(stream)).await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                debug!(error = %e, "failed to read request");
                return None;
            }
            Err(_) => {
                debug!("client did not send a request in time");
                return None;
            }
        };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        write_response(&mut stream, &status_page("400 Bad Request")).await;
        return None;
    };

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != &*callback_path {
        debug!(path, "ignoring request outside the callback path");
        write_response(&mut stream, &status_page("404 Not Found")).await;
        return None;
    }
    if method != "GET" {
        write_response(&mut stream, &status_page("405 Method Not Allowed")).await;
        return None;
    }

    Some((CallbackParams::from_query(query), stream))
}

/// Reads the request line and drains the headers.
async fn read_head(stream: TcpStream) -> std::io::Result<(String, TcpStream)> {
    let mut reader = BufReader::new(stream).take(MAX_HEAD_BYTES);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut header = String::new();
    loop {
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    Ok((request_line, reader.into_inner().into_inner()))
}

async fn write_response(stream: &mut TcpStream, response: &str) {
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "failed to write response");
        return;
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn get(path: &str) -> String {
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nUser-Agent: test\r\n\r\n")
    }

    #[test]
    fn parses_callback_params() {
        let params = CallbackParams::from_query("code=4%2F0Ab&state=abc&scope=x+y");
        assert_eq!(params.code.as_deref(), Some("4/0Ab"));
        assert_eq!(params.state.as_deref(), Some("abc"));
        assert!(params.error.is_none());
    }

    #[test]
    fn empty_and_duplicate_values() {
        let params = CallbackParams::from_query("code=&error=access_denied&error=other");
        assert!(params.code.is_none());
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(CallbackParams::from_query(""), CallbackParams::default());
    }

    #[tokio::test]
    async fn bind_conflict_is_immediate() {
        let held = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = held.local_addr().unwrap().port();

        let err = LoopbackListener::bind(port, "/callback").await.unwrap_err();
        assert!(matches!(err, AuthError::Bind { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn ignores_other_paths_then_accepts_callback() {
        let listener = LoopbackListener::bind(0, "/callback").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(listener.accept_callback(|params| {
            params.code.clone().ok_or(AuthError::MissingCode)
        }));

        let favicon = send(addr, &get("/favicon.ico")).await;
        assert!(favicon.starts_with("HTTP/1.1 404"));

        let post = send(addr, "POST /callback?code=x HTTP/1.1\r\nHost: l\r\n\r\n").await;
        assert!(post.starts_with("HTTP/1.1 405"));

        let ok = send(addr, &get("/callback?code=the-code&state=s")).await;
        assert!(ok.starts_with("HTTP/1.1 200 OK"));

        assert_eq!(server.await.unwrap().unwrap(), "the-code");

        // The listener is gone once the callback was handled.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn rejected_callback_serves_escaped_failure() {
        let listener = LoopbackListener::bind(0, "/callback").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(listener.accept_callback(|params| {
            Err(AuthError::provider(params.error.clone().unwrap_or_default()))
        }));

        let response = send(addr, &get("/callback?error=%3Cimg%20src%3Dx%3E")).await;
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains("&lt;img src=x&gt;"));
        assert!(!response.contains("<img"));

        let err = server.await.unwrap().unwrap_err();
        assert_eq!(err.provider_reason(), Some("<img src=x>"));
    }

    #[tokio::test]
    async fn silent_client_does_not_block_callback() {
        let listener = LoopbackListener::bind(0, "/callback").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(listener.accept_callback(|params| {
            params.code.clone().ok_or(AuthError::MissingCode)
        }));

        // Connects and closes without sending anything.
        drop(TcpStream::connect(addr).await.unwrap());

        let ok = send(addr, &get("/callback?code=c")).await;
        assert!(ok.starts_with("HTTP/1.1 200"));
        assert_eq!(server.await.unwrap().unwrap(), "c");
    }

    #[tokio::test]
    async fn idle_connection_does_not_delay_callback() {
        let listener = LoopbackListener::bind(0, "/callback").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(listener.accept_callback(|params| {
            params.code.clone().ok_or(AuthError::MissingCode)
        }));

        // Preconnects that never send a request stay open for the whole test.
        let _idle_a = TcpStream::connect(addr).await.unwrap();
        let _idle_b = TcpStream::connect(addr).await.unwrap();

        let started = std::time::Instant::now();
        let ok = send(addr, &get("/callback?code=c")).await;
        assert!(ok.starts_with("HTTP/1.1 200"));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "callback answered after {:?}",
            started.elapsed()
        );
        assert_eq!(server.await.unwrap().unwrap(), "c");
    }

    #[test]
    fn accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(0), ACCEPT_BACKOFF_BASE);
        assert!(accept_backoff(1) > accept_backoff(0));
        assert!(accept_backoff(3) > accept_backoff(2));
        assert_eq!(accept_backoff(20), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
    }
}
