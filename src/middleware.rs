use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;

use crate::Result;
use crate::body::Params;
use crate::error::Error;

/// Ordered transform stage over outgoing params/headers and incoming response
/// bytes. All methods default to identity; implement only the direction you
/// need. A failing stage aborts the remaining stages and surfaces as a
/// middleware error, which still flows through the interceptor chain.
pub trait RequestMiddleware: Send + Sync {
    fn process_params(&self, params: Params) -> Result<Params> {
        Ok(params)
    }

    fn process_headers(&self, headers: HeaderMap) -> Result<HeaderMap> {
        Ok(headers)
    }

    fn process_response_body(&self, body: Bytes) -> Result<Bytes> {
        Ok(body)
    }
}

fn as_middleware_error(error: Error) -> Error {
    match error {
        Error::Middleware { .. } => error,
        other => Error::middleware(other.to_string()),
    }
}

pub(crate) fn apply_outgoing(
    chain: &[Arc<dyn RequestMiddleware>],
    params: Params,
    headers: HeaderMap,
) -> Result<(Params, HeaderMap)> {
    let mut params = params;
    let mut headers = headers;
    for stage in chain {
        params = stage.process_params(params).map_err(as_middleware_error)?;
        headers = stage
            .process_headers(headers)
            .map_err(as_middleware_error)?;
    }
    Ok((params, headers))
}

pub(crate) fn apply_incoming(
    chain: &[Arc<dyn RequestMiddleware>],
    body: Bytes,
) -> Result<Bytes> {
    let mut body = body;
    for stage in chain {
        body = stage
            .process_response_body(body)
            .map_err(as_middleware_error)?;
    }
    Ok(body)
}
