use std::convert::Infallible;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;

use crate::Result;
use crate::error::Error;

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const UPLOAD_CHUNK_LEN: usize = 64 * 1024;

type BoxBodyError = Box<dyn StdError + Send + Sync>;
type ReqBody = BoxBody<Bytes, BoxBodyError>;

/// Progress tick: (processed bytes, total bytes if known, completed fraction).
pub type ProgressHandler = Arc<dyn Fn(u64, Option<u64>, f64) + Send + Sync>;

/// Fully-built wire request handed to a transport for one exchange.
pub struct TransportRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Duration,
    pub upload_progress: Option<ProgressHandler>,
    pub download_progress: Option<ProgressHandler>,
}

/// What a transport reports back for one exchange.
#[derive(Clone, Debug)]
pub struct TransportReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type TransportFuture = Pin<Box<dyn Future<Output = Result<TransportReply>> + Send>>;

/// The underlying HTTP send/receive capability. One call performs one
/// exchange; retries, hooks, and interception happen above this seam.
/// Certificate pinning and TLS policy are transport concerns: plug in a
/// custom implementation to change them.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> TransportFuture;
}

fn map_infallible(never: Infallible) -> BoxBodyError {
    match never {}
}

fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible).boxed()
}

pub(crate) fn progress_req_body(body: Bytes, progress: ProgressHandler) -> ReqBody {
    let total = body.len() as u64;
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + UPLOAD_CHUNK_LEN).min(body.len());
        chunks.push(body.slice(offset..end));
        offset = end;
    }

    let mut sent = 0_u64;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        let fraction = if total == 0 {
            1.0
        } else {
            sent as f64 / total as f64
        };
        progress(sent, Some(total), fraction);
        Ok::<_, BoxBodyError>(Frame::data(chunk))
    });
    BodyExt::boxed(StreamBody::new(stream))
}

fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>> {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    request_builder
        .body(body)
        .map_err(|source| Error::RequestBuild { source })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
}

async fn read_all_body(
    mut body: Incoming,
    total: Option<u64>,
    progress: Option<&ProgressHandler>,
) -> std::result::Result<Bytes, hyper::Error> {
    let mut collected = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(data) = frame.data_ref() {
            collected.extend_from_slice(data);
            if let Some(progress) = progress {
                let processed = collected.len() as u64;
                let fraction = match total {
                    Some(total) if total > 0 => (processed as f64 / total as f64).min(1.0),
                    _ => 0.0,
                };
                progress(processed, total, fraction);
            }
        }
    }
    Ok(Bytes::from(collected))
}

/// Default transport: pooled hyper client over rustls (ring provider, webpki
/// roots), HTTP/1.1 + HTTP/2.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, ReqBody>,
}

impl HyperTransport {
    pub fn try_new() -> Result<Self> {
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::TransportInit {
                message: source.to_string(),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(DEFAULT_POOL_MAX_IDLE_PER_HOST)
            .build(https);
        Ok(Self { client })
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: TransportRequest) -> TransportFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let TransportRequest {
                method,
                uri,
                headers,
                body,
                timeout: exchange_timeout,
                upload_progress,
                download_progress,
            } = request;
            let uri_text = uri.to_string();

            let body_bytes = body.unwrap_or_default();
            let req_body = match upload_progress {
                Some(progress) => progress_req_body(body_bytes, progress),
                None => buffered_req_body(body_bytes),
            };
            let wire_request = build_http_request(method.clone(), uri, &headers, req_body)?;

            let exchange = async {
                let response = client.request(wire_request).await.map_err(|source| {
                    Error::Network {
                        method: method.clone(),
                        uri: uri_text.clone(),
                        source: Box::new(source),
                    }
                })?;
                let status = response.status();
                let response_headers = response.headers().clone();
                let total = content_length(&response_headers);
                let body =
                    read_all_body(response.into_body(), total, download_progress.as_ref())
                        .await
                        .map_err(|source| Error::Network {
                            method: method.clone(),
                            uri: uri_text.clone(),
                            source: Box::new(source),
                        })?;
                Ok(TransportReply {
                    status,
                    headers: response_headers,
                    body,
                })
            };

            match timeout(exchange_timeout, exchange).await {
                Ok(reply) => reply,
                Err(_) => Err(Error::Timeout {
                    timeout_ms: exchange_timeout.as_millis(),
                    method,
                    uri: uri_text,
                }),
            }
        })
    }
}
