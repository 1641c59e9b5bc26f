use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::config::{ProxyConfig, TlsConfig};
use crate::error::ConnectError;

/// Largest proxy response head we are willing to buffer.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

pub(crate) type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build `ws[s]://<endpoint>/tail/?app=<app_id>`.
pub(crate) fn tail_url(endpoint: &str, secure: bool, app_id: &str) -> Result<String, ConnectError> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return Err(invalid_endpoint(endpoint, "endpoint is empty"));
    }
    if endpoint.contains("://") {
        return Err(invalid_endpoint(
            endpoint,
            "expected host[:port] without a scheme",
        ));
    }

    let scheme = if secure { "wss" } else { "ws" };
    Ok(format!(
        "{}://{}/tail/?app={}",
        scheme,
        endpoint,
        urlencoding::encode(app_id)
    ))
}

/// Build the upgrade request carrying the auth token verbatim.
pub(crate) fn build_request(
    endpoint: &str,
    secure: bool,
    app_id: &str,
    auth_token: &str,
) -> Result<Request, ConnectError> {
    let url = tail_url(endpoint, secure, app_id)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| invalid_endpoint(endpoint, &e.to_string()))?;

    let token = HeaderValue::from_str(auth_token)
        .map_err(|e| invalid_endpoint(endpoint, &format!("invalid auth token: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, token);

    Ok(request)
}

/// Open TCP (directly or through the proxy), then run TLS and the upgrade.
pub(crate) async fn dial(
    request: Request,
    tls: Option<&TlsConfig>,
    proxy: Option<&ProxyConfig>,
) -> Result<Transport, ConnectError> {
    let (host, port) = target(&request)?;

    let stream = match proxy {
        Some(proxy) => connect_via_proxy(proxy, &host, port).await?,
        None => TcpStream::connect((host.as_str(), port)).await?,
    };
    stream.set_nodelay(true)?;

    let connector = match tls {
        Some(tls) => Some(Connector::Rustls(tls.client_config()?)),
        None => None,
    };

    let (transport, response) = client_async_tls_with_config(request, stream, None, connector).await?;
    debug!(status = %response.status(), "websocket upgrade complete");
    Ok(transport)
}

fn target(request: &Request) -> Result<(String, u16), ConnectError> {
    let uri = request.uri();
    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid_endpoint(&uri.to_string(), "missing host"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("wss") => 443,
        _ => 80,
    });
    Ok((host, port))
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

async fn connect_via_proxy(
    proxy: &ProxyConfig,
    host: &str,
    port: u16,
) -> Result<TcpStream, ConnectError> {
    let mut stream = TcpStream::connect(proxy.address.as_str()).await?;
    let target = authority(host, port);

    let mut head = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n", target);
    if let Some(auth) = proxy.authorization() {
        head.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;

    let response = read_response_head(&mut stream).await?;
    let status = parse_status(&response)?;
    if status != 200 {
        return Err(ConnectError::Proxy(format!(
            "proxy {} answered {} for CONNECT {}",
            proxy.address, status, target
        )));
    }

    debug!(proxy = %proxy.address, %target, "proxy tunnel established");
    Ok(stream)
}

/// Read up to and including the blank line, one byte at a time so no tunnel
/// bytes are consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, ConnectError> {
    let mut buf = Vec::with_capacity(256);
    while !buf.ends_with(b"\r\n\r\n") {
        if buf.len() >= MAX_PROXY_RESPONSE {
            return Err(ConnectError::Proxy("proxy response too large".to_string()));
        }
        buf.push(stream.read_u8().await?);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn parse_status(head: &str) -> Result<u16, ConnectError> {
    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ConnectError::Proxy(format!("malformed proxy response: {:?}", head)))
}

fn invalid_endpoint(endpoint: &str, reason: &str) -> ConnectError {
    ConnectError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}
