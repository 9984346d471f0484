//! Websocket plumbing: endpoint URLs, upgrade requests and connecting.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info};
use url::Url;

use super::error::{StreamError, StreamResult};

/// Client websocket used by every session.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Header that asks the service not to log request data.
pub const LEARNING_OPT_OUT_HEADER: &str = "X-Watson-Learning-Opt-Out";

/// Join a websocket base URL, a path and query parameters.
///
/// `https`/`http` bases are rewritten to `wss`/`ws`.
pub fn endpoint_url(base: &str, path: &str, params: &[(&'static str, String)]) -> StreamResult<Url> {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };

    let mut url = Url::parse(&format!("{base}{path}"))
        .map_err(|e| StreamError::ConfigurationError(format!("Invalid service URL '{base}': {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(StreamError::ConfigurationError(format!(
            "Service URL must use ws, wss, http or https; got '{}'",
            url.scheme()
        )));
    }
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Build the upgrade request with credentials and extra headers.
pub fn build_request(
    url: &Url,
    authorization: Option<&str>,
    headers: &[(String, String)],
) -> StreamResult<Request> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| StreamError::ConfigurationError(format!("Invalid WebSocket URL: {e}")))?;

    for (key, value) in headers {
        let name = key.parse::<HeaderName>().map_err(|e| {
            StreamError::ConfigurationError(format!("Invalid header name '{key}': {e}"))
        })?;
        let value = value.parse::<HeaderValue>().map_err(|e| {
            StreamError::ConfigurationError(format!("Invalid value for header '{key}': {e}"))
        })?;
        request.headers_mut().insert(name, value);
    }

    if let Some(auth) = authorization {
        let value = auth.parse::<HeaderValue>().map_err(|_| {
            StreamError::AuthenticationFailed("Credentials are not a valid header value".to_string())
        })?;
        request
            .headers_mut()
            .insert(tungstenite::http::header::AUTHORIZATION, value);
    }

    Ok(request)
}

/// Open the websocket, bounded by `connect_timeout`.
pub async fn connect(request: Request, connect_timeout: Duration) -> StreamResult<WsStream> {
    let uri = request.uri().clone();
    debug!(uri = %redact(&uri.to_string()), "Opening websocket");

    let (stream, response) = tokio::time::timeout(connect_timeout, connect_async(request))
        .await
        .map_err(|_| {
            StreamError::ConnectionFailed(format!(
                "Connection timed out after {}ms",
                connect_timeout.as_millis()
            ))
        })?
        .map_err(classify_handshake_error)?;

    info!(host = ?uri.host(), status = %response.status(), "Websocket upgrade accepted");
    Ok(stream)
}

/// Map a failed upgrade to the error callers see.
pub fn classify_handshake_error(err: tungstenite::Error) -> StreamError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            match status.as_u16() {
                401 => StreamError::AuthenticationFailed(format!(
                    "Upgrade rejected ({status}). Check your credentials."
                )),
                403 => StreamError::AuthenticationFailed(format!(
                    "Upgrade forbidden ({status}). Check your service plan and instance."
                )),
                _ => StreamError::ConnectionFailed(format!("Upgrade rejected ({status})")),
            }
        }
        tungstenite::Error::Url(e) => StreamError::ConfigurationError(format!("Invalid WebSocket URL: {e}")),
        other => StreamError::ConnectionFailed(format!("Failed to connect: {other}")),
    }
}

/// Strip the query string, which may carry identifiers, before logging.
fn redact(uri: &str) -> &str {
    uri.split('?').next().unwrap_or(uri)
}
