//! Authorization callback handling
//!
//! The authorization server returns the user to the redirect URI with
//! `code` and `state` (or `error`) in the query string. This module parses
//! those parameters from a pasted callback URL or captures them with a
//! one-shot local listener bound to the redirect URI. Validation of `state`
//! happens in the flow controller, so both paths share it.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use url::Url;

use crate::error::{PlaygroundError, Result};

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nAuthorization received. You may close this tab and return to the playground.";
const NOT_FOUND_PAGE: &str =
    "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nNot found";

/// Query parameters carried by an authorization redirect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// CSRF state echoed by the server
    pub state: Option<String>,
    /// OAuth error code
    pub error: Option<String>,
    /// OAuth error description
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a raw query string (without the leading `?`)
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match &*key {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    /// Parse from a full callback URL as pasted from the browser
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::InvalidInput`] if `url` is not a URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim()).map_err(|e| {
            PlaygroundError::InvalidInput(format!("callback URL is not a valid URL: {}", e))
        })?;
        Ok(Self::from_query(parsed.query().unwrap_or("")))
    }

    /// Whether this looks like an authorization redirect at all
    pub fn is_redirect(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

/// Bind a listener on the host and port of `redirect_uri`
///
/// # Errors
///
/// Returns an error if the URI has no host or the address cannot be bound.
pub async fn bind_redirect_listener(redirect_uri: &str) -> Result<TcpListener> {
    let url = Url::parse(redirect_uri)?;
    let host = url.host_str().ok_or_else(|| {
        PlaygroundError::InvalidInput(format!("redirect URI has no host: {}", redirect_uri))
    })?;
    let port = url.port_or_known_default().unwrap_or(80);
    let listener = TcpListener::bind((host, port)).await?;
    tracing::info!("Listening for the authorization redirect on {}:{}", host, port);
    Ok(listener)
}

/// Wait for the browser to hit the redirect path and return its parameters
///
/// Requests for other paths, or without `code`/`error` (favicon fetches,
/// prefetches), get a 404 and the listener keeps waiting.
///
/// # Errors
///
/// Returns [`PlaygroundError::Io`] if accepting or reading a connection fails.
pub async fn await_redirect(listener: &TcpListener, redirect_path: &str) -> Result<CallbackParams> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let mut request_line = String::new();
        while let Some(line) = lines.next_line().await? {
            // Headers end at the first empty line.
            if line.is_empty() {
                break;
            }
            if request_line.is_empty() {
                request_line = line;
            }
        }

        // "GET /callback?code=...&state=... HTTP/1.1"
        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let params = CallbackParams::from_query(query);

        if path == redirect_path && params.is_redirect() {
            let _ = write_half.write_all(SUCCESS_PAGE.as_bytes()).await;
            let _ = write_half.shutdown().await;
            tracing::debug!(%peer, "Captured authorization redirect");
            return Ok(params);
        }

        tracing::debug!(%peer, request_target = target, "Ignoring unrelated request on redirect listener");
        let _ = write_half.write_all(NOT_FOUND_PAGE.as_bytes()).await;
        let _ = write_half.shutdown().await;
    }
}

/// Try to open `url` in the system browser
///
/// Failures are ignored; the URL is always printed for manual use as well.
pub fn try_open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = url;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    #[test]
    fn test_from_query_decodes_values() {
        let params = CallbackParams::from_query("code=abc%2F123&state=xyz&extra=1");
        assert_eq!(params.code.as_deref(), Some("abc/123"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert!(params.error.is_none());
        assert!(params.is_redirect());
    }

    #[test]
    fn test_from_query_error_redirect() {
        let params =
            CallbackParams::from_query("error=access_denied&error_description=User+denied+access");
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User denied access"));
        assert!(params.code.is_none());
    }

    #[test]
    fn test_from_query_empty() {
        let params = CallbackParams::from_query("");
        assert_eq!(params, CallbackParams::default());
        assert!(!params.is_redirect());
    }

    #[test]
    fn test_from_url() {
        let params =
            CallbackParams::from_url("  http://localhost:3000/callback?code=c1&state=s1 ").unwrap();
        assert_eq!(params.code.as_deref(), Some("c1"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert!(CallbackParams::from_url("c1").is_err());
    }

    async fn send_request(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target).as_bytes())
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_await_redirect_skips_unrelated_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let waiter = tokio::spawn(async move { await_redirect(&listener, "/callback").await });

        let favicon = send_request(port, "/favicon.ico").await;
        assert!(favicon.starts_with("HTTP/1.1 404"));

        let reply = send_request(port, "/callback?code=the-code&state=the-state").await;
        assert!(reply.starts_with("HTTP/1.1 200"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.code.as_deref(), Some("the-code"));
        assert_eq!(params.state.as_deref(), Some("the-state"));
    }

    #[tokio::test]
    async fn test_bind_redirect_listener_uses_uri_port() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let listener = bind_redirect_listener(&format!("http://127.0.0.1:{}/callback", port))
            .await
            .unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }
}
