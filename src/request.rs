use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use serde_json::Value;
use tokio::sync::Notify;

use crate::Result;
use crate::body::{BodyEncoding, MultipartPart, Params, validate_params};
use crate::error::Error;
use crate::interceptor::Interceptor;
use crate::middleware::RequestMiddleware;
use crate::transport::ProgressHandler;
use crate::util::{append_query_pairs, lock_unpoisoned, parse_header_name, parse_header_value};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of one logical request. Retrying loops back through `Queued`;
/// `Completed`, `Failed`, and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Built,
    Queued,
    Active,
    RetryPending,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Who asked for the cancellation. Policy cancellations (cancel-all failure
/// mode) count as failure outcomes for the batch error flag; user
/// cancellations do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    User,
    Policy,
}

const CANCEL_IDLE: u8 = 0;
const CANCEL_USER: u8 = 1;
const CANCEL_POLICY: u8 = 2;

/// Atomically-checked cancellation flag shared between the caller's handle
/// and the in-flight worker. `cancel` is idempotent; the first reason wins.
#[derive(Debug)]
pub(crate) struct CancelToken {
    state: AtomicU8,
    notify: Notify,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(CANCEL_IDLE),
            notify: Notify::new(),
        }
    }

    pub(crate) fn cancel(&self, reason: CancelReason) {
        let encoded = match reason {
            CancelReason::User => CANCEL_USER,
            CancelReason::Policy => CANCEL_POLICY,
        };
        if self
            .state
            .compare_exchange(CANCEL_IDLE, encoded, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != CANCEL_IDLE
    }

    pub(crate) fn reason(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::Acquire) {
            CANCEL_USER => Some(CancelReason::User),
            CANCEL_POLICY => Some(CancelReason::Policy),
            _ => None,
        }
    }

    pub(crate) async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// State shared between a moved-in `Request`, its queue worker, and the
/// caller-facing handle.
#[derive(Clone, Debug)]
pub(crate) struct RequestShared {
    pub(crate) token: Arc<CancelToken>,
    pub(crate) state: Arc<Mutex<RequestState>>,
    pub(crate) retry_count: Arc<AtomicUsize>,
}

impl RequestShared {
    fn new() -> Self {
        Self {
            token: Arc::new(CancelToken::new()),
            state: Arc::new(Mutex::new(RequestState::Built)),
            retry_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn set_state(&self, state: RequestState) {
        *lock_unpoisoned(&self.state) = state;
    }

    pub(crate) fn state(&self) -> RequestState {
        *lock_unpoisoned(&self.state)
    }
}

/// One unit of work: a frozen request descriptor plus its transient
/// lifecycle state. Owned by at most one queue at a time.
pub struct Request {
    pub(crate) id: u64,
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) uri_text: String,
    pub(crate) headers: HeaderMap,
    pub(crate) params: Params,
    pub(crate) parts: Vec<MultipartPart>,
    pub(crate) body_encoding: BodyEncoding,
    pub(crate) timeout: Option<Duration>,
    pub(crate) allow_empty_body: Option<bool>,
    pub(crate) status_policy: Option<crate::config::StatusPolicy>,
    pub(crate) middleware: Vec<Arc<dyn RequestMiddleware>>,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) skip_hooks: bool,
    pub(crate) upload_progress: Option<ProgressHandler>,
    pub(crate) download_progress: Option<ProgressHandler>,
    pub(crate) shared: RequestShared,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.uri_text
    }

    pub fn state(&self) -> RequestState {
        self.shared.state()
    }

    pub fn retry_count(&self) -> usize {
        self.shared.retry_count.load(Ordering::Acquire)
    }

    pub fn skip_hooks(&self) -> bool {
        self.skip_hooks
    }

    /// Idempotent. A cancelled request never resolves successfully even when
    /// its transport callback has already produced data.
    pub fn cancel(&self) {
        self.shared.token.cancel(CancelReason::User);
    }

    pub(crate) fn shared(&self) -> RequestShared {
        self.shared.clone()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri_text)
            .field("body_encoding", &self.body_encoding)
            .field("state", &self.state())
            .finish()
    }
}

impl std::fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("body_encoding", &self.body_encoding)
            .finish()
    }
}

/// Builder for a single request. Construction-time misuse (invalid url,
/// missing base url, malformed param shapes) fails here, never at send time.
pub struct RequestBuilder<'a> {
    client: &'a crate::client::Client,
    method: Method,
    path: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    params: Params,
    parts: Vec<MultipartPart>,
    body_encoding: BodyEncoding,
    timeout: Option<Duration>,
    allow_empty_body: Option<bool>,
    status_policy: Option<crate::config::StatusPolicy>,
    middleware: Vec<Arc<dyn RequestMiddleware>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    skip_hooks: bool,
    upload_progress: Option<ProgressHandler>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a crate::client::Client, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            params: Params::new(),
            parts: Vec::new(),
            body_encoding: BodyEncoding::default(),
            timeout: None,
            allow_empty_body: None,
            status_policy: None,
            middleware: Vec::new(),
            interceptors: Vec::new(),
            skip_hooks: false,
            upload_progress: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    /// Adds one body param. `Value::Null` keeps the key present through
    /// encoding, distinct from never setting it.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        for (name, value) in params {
            self.params.insert(name, value);
        }
        self
    }

    pub fn body_encoding(mut self, body_encoding: BodyEncoding) -> Self {
        self.body_encoding = body_encoding;
        self
    }

    pub fn multipart(mut self, parts: impl IntoIterator<Item = MultipartPart>) -> Self {
        self.parts.extend(parts);
        self.body_encoding = BodyEncoding::Multipart;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    /// An empty body on a success status fails with `EmptyResponseBody`
    /// unless allowed here. HEAD responses and 204/304 statuses are exempt
    /// regardless: those replies carry no body by definition.
    pub fn allow_empty_body(mut self, allow_empty_body: bool) -> Self {
        self.allow_empty_body = Some(allow_empty_body);
        self
    }

    pub fn status_policy(mut self, status_policy: crate::config::StatusPolicy) -> Self {
        self.status_policy = Some(status_policy);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn RequestMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Opts this request out of queue lifecycle hooks. Admission control is
    /// unaffected.
    pub fn skip_hooks(mut self, skip_hooks: bool) -> Self {
        self.skip_hooks = skip_hooks;
        self
    }

    pub fn upload_progress(mut self, progress: ProgressHandler) -> Self {
        self.upload_progress = Some(progress);
        self
    }

    /// Freezes the request: resolves the url, merges the configuration's
    /// middleware/interceptor chains with the per-request ones, validates
    /// param shapes for the chosen encoding.
    pub fn build(self) -> Result<Request> {
        let config = self.client.configuration();

        if !self.parts.is_empty() && self.body_encoding != BodyEncoding::Multipart {
            return Err(Error::InvalidParam {
                name: self.parts[0].name().to_owned(),
                message: "multipart parts require multipart body encoding".to_owned(),
            });
        }
        validate_params(self.body_encoding, &self.params)?;

        let path = append_query_pairs(&self.path, &self.query_pairs);
        let (uri_text, uri) = crate::util::resolve_uri(config.base_url(), &path)?;

        let mut middleware: Vec<Arc<dyn RequestMiddleware>> = config.middleware().to_vec();
        middleware.extend(self.middleware);
        let mut interceptors: Vec<Arc<dyn Interceptor>> = config.interceptors().to_vec();
        interceptors.extend(self.interceptors);

        Ok(Request {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            method: self.method,
            uri,
            uri_text,
            headers: self.headers,
            params: self.params,
            parts: self.parts,
            body_encoding: self.body_encoding,
            timeout: self.timeout,
            allow_empty_body: self.allow_empty_body,
            status_policy: self.status_policy,
            middleware,
            interceptors,
            skip_hooks: self.skip_hooks,
            upload_progress: self.upload_progress,
            download_progress: None,
            shared: RequestShared::new(),
        })
    }

    pub async fn send(self) -> Result<crate::response::Response> {
        let client = self.client;
        let request = self.build()?;
        client.execute(request).await
    }

    pub async fn send_json<T>(self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.send().await?;
        response.json()
    }

    pub async fn send_string(self) -> Result<String> {
        let response = self.send().await?;
        response.text()
    }

    pub async fn send_image(self) -> Result<crate::response::ImageData> {
        let response = self.send().await?;
        response.image()
    }

    pub async fn send_transformed<M, T>(
        self,
        transformer: &dyn crate::response::Transformer<M, T>,
    ) -> Result<T>
    where
        M: serde::de::DeserializeOwned,
    {
        let response = self.send().await?;
        response.transform(transformer)
    }

    /// Sends with request-body progress ticks.
    pub async fn upload(self, progress: ProgressHandler) -> Result<crate::response::Response> {
        self.upload_progress(progress).send().await
    }

    /// Fetches the response and writes its body to `path`. Progress ticks as
    /// bytes arrive off the wire; the file itself is written in one piece
    /// once the body is complete. Returns the number of bytes written.
    pub async fn download(
        self,
        path: impl Into<std::path::PathBuf>,
        progress: Option<ProgressHandler>,
    ) -> Result<u64> {
        let client = self.client;
        let mut request = self.build()?;
        request.download_progress = progress;
        let response = client.execute(request).await?;
        let path = path.into();
        let body = response.into_body();
        tokio::fs::write(&path, &body)
            .await
            .map_err(|source| Error::DownloadFileNotSaved {
                path: path.display().to_string(),
                source,
            })?;
        Ok(body.len() as u64)
    }
}
