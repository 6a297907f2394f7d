use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use aiproxy_auth::ExecutorError;
use bytes::Bytes;
use wreq::{Client, Method, Proxy};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Shared upstream HTTP client, cached per outbound proxy URL.
pub struct SharedHttpClient {
    proxy: Option<String>,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl SharedHttpClient {
    pub fn new(proxy: Option<String>) -> Self {
        Self {
            proxy: proxy
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> Result<Client, ExecutorError> {
        let key = self.proxy.clone();
        let mut guard = self.clients.lock().expect("http client cache lock poisoned");
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .read_timeout(STREAM_IDLE_TIMEOUT);
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(
                Proxy::all(proxy)
                    .map_err(|err| ExecutorError::transport(format!("invalid proxy: {err}")))?,
            );
        }
        let client = builder
            .build()
            .map_err(|err| ExecutorError::transport(format!("http client build failed: {err}")))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

/// A buffered upstream response (unary path, or an error body).
pub(crate) struct UpstreamResponse {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

pub(crate) fn header_map_from(headers: &wreq::header::HeaderMap) -> http::HeaderMap {
    let mut out = http::HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            http::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

pub(crate) async fn send(
    client: &Client,
    method: Method,
    url: &str,
    headers: &[(String, String)],
    body: Option<Vec<u8>>,
) -> Result<wreq::Response, ExecutorError> {
    let mut builder = client.request(method, url);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = body {
        builder = builder.body(body);
    }
    builder
        .send()
        .await
        .map_err(|err| ExecutorError::transport(format!("upstream request failed: {err}")))
}

/// Unary call: buffers the whole body. Non-2xx becomes an [`ExecutorError`]
/// carrying status, headers, and the error body as its message so request
/// logs stay complete.
pub(crate) async fn send_unary(
    client: &Client,
    method: Method,
    url: &str,
    headers: &[(String, String)],
    body: Option<Vec<u8>>,
) -> Result<UpstreamResponse, ExecutorError> {
    let response = send(client, method, url, headers, body).await?;
    let status = response.status().as_u16();
    let headers = header_map_from(response.headers());
    let body = response
        .bytes()
        .await
        .map_err(|err| ExecutorError::transport(format!("upstream body read failed: {err}")))?;
    if !(200..300).contains(&status) {
        tracing::debug!(status, url, body = %String::from_utf8_lossy(&body), "upstream error response");
        return Err(ExecutorError::new(status, String::from_utf8_lossy(&body).into_owned())
            .with_headers(headers));
    }
    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}
