use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use http::StatusCode;
use http::header::{HeaderName, HeaderValue};

use crate::Result;
use crate::interceptor::Interceptor;
use crate::middleware::RequestMiddleware;
use crate::util::{parse_header_name, parse_header_value};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides which response statuses count as success. Non-matching statuses
/// surface as `Error::NotSuccess` and are offered to the interceptor chain.
#[derive(Clone)]
pub struct StatusPolicy {
    predicate: Arc<dyn Fn(StatusCode) -> bool + Send + Sync>,
    label: &'static str,
}

impl StatusPolicy {
    /// 2xx counts as success. The default.
    pub fn success_range() -> Self {
        Self {
            predicate: Arc::new(|status| status.is_success()),
            label: "success_range",
        }
    }

    /// Every status counts as success; status handling is left to the caller.
    pub fn any_status() -> Self {
        Self {
            predicate: Arc::new(|_| true),
            label: "any_status",
        }
    }

    pub fn custom(predicate: impl Fn(StatusCode) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
            label: "custom",
        }
    }

    pub fn is_success(&self, status: StatusCode) -> bool {
        (self.predicate)(status)
    }
}

impl fmt::Debug for StatusPolicy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StatusPolicy")
            .field("label", &self.label)
            .finish()
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::success_range()
    }
}

/// Explicit, passed-in configuration. There is no process-wide default; a
/// `Configuration` is handed to `Client::builder` and shared read-only by
/// every request built from that client.
#[derive(Clone)]
pub struct Configuration {
    base_url: Option<String>,
    default_headers: HeaderMap,
    timeout: Duration,
    allow_empty_body: bool,
    status_policy: StatusPolicy,
    middleware: Vec<Arc<dyn RequestMiddleware>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Configuration {
    /// Configuration without a base url. Requests with relative paths fail at
    /// build time with `EnvironmentNotConfigured`.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            allow_empty_body: false,
            status_policy: StatusPolicy::default(),
            middleware: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self::new().with_base_url(base_url)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn with_allow_empty_body(mut self, allow_empty_body: bool) -> Self {
        self.allow_empty_body = allow_empty_body;
        self
    }

    pub fn with_status_policy(mut self, status_policy: StatusPolicy) -> Self {
        self.status_policy = status_policy;
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_with_default_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.with_default_header(name, value))
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn RequestMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn allow_empty_body(&self) -> bool {
        self.allow_empty_body
    }

    pub fn status_policy(&self) -> &StatusPolicy {
        &self.status_policy
    }

    pub(crate) fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub(crate) fn middleware(&self) -> &[Arc<dyn RequestMiddleware>] {
        &self.middleware
    }

    pub(crate) fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Configuration")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("allow_empty_body", &self.allow_empty_body)
            .field("status_policy", &self.status_policy)
            .field("middleware_len", &self.middleware.len())
            .field("interceptors_len", &self.interceptors.len())
            .finish()
    }
}
