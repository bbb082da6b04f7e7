use std::marker::PhantomData;

use http::Method;
use serde_json::Value;

use crate::Result;
use crate::body::{BodyEncoding, MultipartPart, Params};
use crate::client::Client;
use crate::request::RequestBuilder;
use crate::response::Response;

/// Declarative description of one API endpoint: method, path, params,
/// headers, and body encoding. Produced by `Route::configure`, consumed by a
/// `Router`.
#[derive(Clone, Debug)]
pub struct RouteConfiguration {
    method: Method,
    path: String,
    params: Params,
    headers: Vec<(String, String)>,
    body_encoding: BodyEncoding,
    parts: Vec<MultipartPart>,
}

impl RouteConfiguration {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            headers: Vec::new(),
            body_encoding: BodyEncoding::default(),
            parts: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Raw header strings; validation happens when the router builds the
    /// request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
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

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// One endpoint of an API surface. Typically implemented on an enum whose
/// variants carry the endpoint arguments.
pub trait Route {
    fn configure(&self) -> RouteConfiguration;
}

/// Typed facade over a `Client` for one `Route` family. Grouping endpoints
/// behind a router keeps paths and param names in one place.
#[derive(Clone, Debug)]
pub struct Router<R> {
    client: Client,
    _routes: PhantomData<fn(R)>,
}

impl<R: Route> Router<R> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _routes: PhantomData,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Materializes a route into a request builder, so callers can still
    /// layer per-request options (timeout, interceptors) on top.
    pub fn request(&self, route: &R) -> Result<RequestBuilder<'_>> {
        builder_for_route(&self.client, route.configure())
    }

    pub async fn send(&self, route: &R) -> Result<Response> {
        self.request(route)?.send().await
    }

    pub async fn send_json<T>(&self, route: &R) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.request(route)?.send_json().await
    }

    pub async fn send_string(&self, route: &R) -> Result<String> {
        self.request(route)?.send_string().await
    }
}

pub(crate) fn builder_for_route(
    client: &Client,
    configuration: RouteConfiguration,
) -> Result<RequestBuilder<'_>> {
    let mut builder = client
        .request(configuration.method, configuration.path)
        .params(configuration.params)
        .body_encoding(configuration.body_encoding);
    if !configuration.parts.is_empty() {
        builder = builder.multipart(configuration.parts);
    }
    for (name, value) in &configuration.headers {
        builder = builder.try_header(name, value)?;
    }
    Ok(builder)
}
