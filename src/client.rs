use std::fmt;
use std::sync::Arc;

use http::Method;

use crate::Result;
use crate::config::Configuration;
use crate::dispatch;
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::transport::{HyperTransport, Transport};

struct ClientInner {
    configuration: Configuration,
    transport: Arc<dyn Transport>,
}

/// Entry point for building and sending requests. Cheap to clone; all clones
/// share the same configuration and pooled transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder(configuration: Configuration) -> ClientBuilder {
        ClientBuilder {
            configuration,
            transport: None,
        }
    }

    /// Client over the default pooled TLS transport.
    pub fn try_new(configuration: Configuration) -> Result<Self> {
        Self::builder(configuration).try_build()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.inner.configuration
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path.into())
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn head(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::HEAD, path)
    }

    /// Builder for a declaratively-described endpoint. Header strings on the
    /// route are validated here.
    pub fn route(&self, route: &impl crate::router::Route) -> Result<RequestBuilder<'_>> {
        crate::router::builder_for_route(self, route.configure())
    }

    /// Runs a built request to completion, including interceptor-driven
    /// retries. Queued execution goes through `Queue::enqueue` instead.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        dispatch::run(self.transport(), self.configuration(), &request).await
    }

    /// Detached execution outside any queue: the request starts immediately
    /// and the returned handle can cancel it or await its outcome.
    pub fn start(&self, request: Request) -> crate::queue::RequestHandle {
        let shared = request.shared();
        let method = request.method().clone();
        let uri = request.url().to_owned();
        let (tx, receiver) = tokio::sync::oneshot::channel();
        let client = self.clone();
        tokio::spawn(async move {
            let outcome =
                dispatch::run(client.transport(), client.configuration(), &request).await;
            let _ = tx.send(outcome);
        });
        crate::queue::RequestHandle::new(method, uri, shared, receiver)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Client")
            .field("configuration", &self.inner.configuration)
            .finish()
    }
}

pub struct ClientBuilder {
    configuration: Configuration,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Swaps in a custom transport. Tests use scripted transports here;
    /// production code can use it for pinning or proxying.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn try_build(self) -> Result<Client> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::try_new()?),
        };
        Ok(Client {
            inner: Arc::new(ClientInner {
                configuration: self.configuration,
                transport,
            }),
        })
    }
}
