use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use caplink_core::contract::OP_SEND_REQUEST;
use caplink_core::{Body, ContractError, OutgoingRequest, Payload, ProviderKind, ResolvedTarget};
use futures::{Stream, StreamExt};
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::config::HttpConfig;
use crate::error::HttpError;
use crate::mediator::{MediatedCall, Mediator, MediatorFuture, Reply};
use crate::pool::{ConnectionPool, PoolLease};

/// `host:port` the link permits traffic to.
pub const ADDRESS: &str = "ADDRESS";
/// `http` (default) or `https`.
pub const SCHEME: &str = "SCHEME";
/// Per-link override of the request timeout.
pub const TIMEOUT_MS: &str = "TIMEOUT_MS";

type ChunkResult = Result<Vec<u8>, HttpError>;

/// `(status, headers, body)` of a completed request. The body is pulled from
/// the network chunk by chunk as the caller reads it.
#[derive(Debug)]
pub struct IncomingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl IncomingResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct ResponseBody {
    chunks: Option<Pin<Box<dyn Stream<Item = ChunkResult> + Send>>>,
    address: String,
    cancel: CancellationToken,
    // Keeps the pool entry counted as in use until the body is drained.
    _lease: Option<PoolLease>,
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("address", &self.address)
            .field("finished", &self.chunks.is_none())
            .finish()
    }
}

impl ResponseBody {
    fn streaming(
        response: reqwest::Response,
        address: String,
        timeout_ms: u64,
        cancel: CancellationToken,
        lease: PoolLease,
    ) -> Self {
        let error_address = address.clone();
        let chunks = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| classify(&error_address, timeout_ms, &e))
        });
        Self {
            chunks: Some(Box::pin(chunks)),
            address,
            cancel,
            _lease: Some(lease),
        }
    }

    /// An in-memory body, for mediators and tests that do not touch the network.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            chunks: Some(Box::pin(futures::stream::iter([Ok(bytes)]))),
            address: String::new(),
            cancel: CancellationToken::new(),
            _lease: None,
        }
    }

    /// Next body chunk, `None` once the body is exhausted.
    pub async fn next_chunk(&mut self) -> Option<ChunkResult> {
        let cancel = self.cancel.clone();
        let next = {
            let chunks = self.chunks.as_mut()?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = chunks.next() => Some(next),
            }
        };

        match next {
            None => {
                self.finish();
                Some(Err(HttpError::Cancelled {
                    address: self.address.clone(),
                }))
            }
            Some(None) => {
                self.finish();
                None
            }
            Some(Some(Ok(chunk))) => Some(Ok(chunk)),
            Some(Some(Err(e))) => {
                self.finish();
                Some(Err(e))
            }
        }
    }

    /// Buffer the remaining body.
    pub async fn collect(mut self) -> Result<Vec<u8>, HttpError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }

    fn finish(&mut self) {
        self.chunks = None;
        self._lease = None;
    }
}

/// The link values the mediator acts on.
struct Binding {
    scheme: String,
    address: String,
    base: Url,
    timeout: Duration,
}

impl Binding {
    fn from_target(target: &ResolvedTarget, default_timeout: Duration) -> Result<Self, HttpError> {
        let address = target
            .value(ADDRESS)
            .ok_or_else(|| {
                HttpError::InvalidRequest(format!(
                    "link to '{}' has no {ADDRESS} value",
                    target.provider_id
                ))
            })?
            .to_string();

        let scheme = target.value(SCHEME).unwrap_or("http").to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidRequest(format!(
                "unsupported {SCHEME} '{scheme}'"
            )));
        }

        let timeout = match target.value(TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| {
                HttpError::InvalidRequest(format!("{TIMEOUT_MS} '{raw}' is not a number"))
            })?),
            None => default_timeout,
        };

        let base = Url::parse(&format!("{scheme}://{address}/")).map_err(|e| {
            HttpError::InvalidRequest(format!("{ADDRESS} '{address}' is not host:port: {e}"))
        })?;

        Ok(Self {
            scheme,
            address,
            base,
            timeout,
        })
    }

    fn pool_key(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Origin-form URIs are joined onto the linked address; absolute URIs
    /// must already point at it.
    fn url_for(&self, uri: &str) -> Result<Url, HttpError> {
        if uri.is_empty() || uri.starts_with('/') {
            let path = if uri.is_empty() { "/" } else { uri };
            return Url::parse(&format!("{}://{}{path}", self.scheme, self.address))
                .map_err(|e| HttpError::InvalidRequest(format!("invalid uri '{uri}': {e}")));
        }

        let url = Url::parse(uri)
            .map_err(|e| HttpError::InvalidRequest(format!("invalid uri '{uri}': {e}")))?;
        let same_origin = url.scheme() == self.base.scheme()
            && url.host_str() == self.base.host_str()
            && url.port_or_known_default() == self.base.port_or_known_default();
        if !same_origin {
            return Err(HttpError::AddressNotPermitted {
                address: self.address.clone(),
                requested: uri.to_string(),
            });
        }
        Ok(url)
    }
}

/// Executes `send-request` for components linked to an HTTP provider.
///
/// Failures are reported as they happen; nothing is retried here.
pub struct HttpMediator {
    pool: ConnectionPool,
    request_timeout: Duration,
}

impl HttpMediator {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            pool: ConnectionPool::new(config),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn send(
        &self,
        target: &ResolvedTarget,
        request: OutgoingRequest,
        cancel: &CancellationToken,
    ) -> Result<IncomingResponse, HttpError> {
        let binding = Binding::from_target(target, self.request_timeout)?;
        let url = binding.url_for(&request.uri)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            HttpError::InvalidRequest(format!("invalid method '{}'", request.method))
        })?;
        let address = binding.address.clone();
        let timeout_ms = binding.timeout_ms();

        tracing::debug!(
            component = %target.source_component_id,
            %address,
            %method,
            path = url.path(),
            "Sending outgoing request"
        );

        let exchange = {
            let pool_key = binding.pool_key();
            let address = address.clone();
            let timeout = binding.timeout;
            async move {
                let lease = self.pool.acquire(&pool_key).await?;
                let mut builder = lease.client().request(method, url).timeout(timeout);
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder = match request.body {
                    Body::Empty => builder,
                    Body::Full(bytes) => builder.body(bytes),
                    Body::Stream(chunks) => builder.body(reqwest::Body::wrap_stream(chunks)),
                };
                let response = builder
                    .send()
                    .await
                    .map_err(|e| classify(&address, timeout_ms, &e))?;
                Ok::<_, HttpError>((lease, response))
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = tokio::time::timeout(binding.timeout, exchange) => Some(outcome),
        };
        let (lease, response) = match outcome {
            None => {
                tracing::debug!(%address, "Outgoing request cancelled");
                return Err(HttpError::Cancelled { address });
            }
            Some(Err(_elapsed)) => return Err(HttpError::Timeout { address, timeout_ms }),
            Some(Ok(result)) => result?,
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        tracing::debug!(%address, status, "Outgoing request answered");

        Ok(IncomingResponse {
            status,
            headers,
            body: ResponseBody::streaming(response, address, timeout_ms, cancel.clone(), lease),
        })
    }
}

impl Mediator for HttpMediator {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Http
    }

    fn name(&self) -> &str {
        "outgoing-http"
    }

    fn execute(&self, call: MediatedCall) -> MediatorFuture<'_> {
        Box::pin(async move {
            let request = match call.payload {
                Payload::Http(request) if call.operation == OP_SEND_REQUEST => request,
                _ => {
                    return Err(ContractError::ContractMismatch {
                        contract_id: call.target.contract_id.clone(),
                        operation: call.operation,
                        reason: "outgoing-http only serves send-request".into(),
                    }
                    .into());
                }
            };
            let response = self.send(&call.target, request, &call.cancel).await?;
            Ok(Reply::Http(response))
        })
    }
}

/// Map a client error onto the mediator's failure taxonomy.
fn classify(address: &str, timeout_ms: u64, error: &reqwest::Error) -> HttpError {
    let detail = error_chain(error);
    let address = address.to_string();

    if error.is_timeout() {
        HttpError::Timeout {
            address,
            timeout_ms,
        }
    } else if mentions_tls(&detail) {
        HttpError::TlsFailure { address, detail }
    } else if error.is_connect() {
        HttpError::Refused { address, detail }
    } else if error.is_builder() {
        HttpError::InvalidRequest(detail)
    } else {
        HttpError::Transport { address, detail }
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

fn mentions_tls(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    ["tls", "ssl", "certificate", "handshake"]
        .iter()
        .any(|needle| lower.contains(needle))
}
