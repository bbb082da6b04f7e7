use std::sync::atomic::Ordering;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode, Uri};
use tracing::{debug, warn};

use crate::Result;
use crate::body::{BodyEncoding, encode_body, params_as_pairs};
use crate::config::Configuration;
use crate::error::Error;
use crate::interceptor::{AttemptRecord, InterceptionAction, consult};
use crate::middleware::{apply_incoming, apply_outgoing};
use crate::request::{Request, RequestState};
use crate::response::Response;
use crate::transport::{Transport, TransportRequest};
use crate::util::{append_query_pairs, merge_headers, truncate_body};

/// How one attempt settled. Failures keep whatever status/body the wire
/// produced so interceptors can inspect them.
pub(crate) enum AttemptResult {
    Success(Response),
    Failure {
        status: Option<StatusCode>,
        body: Option<Bytes>,
        error: Error,
    },
}

impl AttemptResult {
    fn failed(error: Error) -> Self {
        Self::Failure {
            status: None,
            body: None,
            error,
        }
    }
}

fn params_bind_to_query(method: &Method, encoding: BodyEncoding) -> bool {
    encoding == BodyEncoding::UrlEncoded
        && matches!(*method, Method::GET | Method::HEAD | Method::DELETE)
}

// HEAD responses and 204/304 statuses are bodiless by definition, so they
// pass the empty-body check even when `allow_empty_body` is false.
fn empty_body_is_expected(method: &Method, status: StatusCode) -> bool {
    *method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Runs exactly one attempt: outgoing middleware, body encoding, the
/// transport exchange raced against cancellation, then status policy, the
/// empty-body check, and incoming middleware. `before_send` fires immediately
/// before the transport exchange, so a middleware rejection never triggers
/// it. Cancellation wins every race, including against a transport callback
/// that already produced data.
pub(crate) async fn attempt_once(
    transport: &dyn Transport,
    config: &Configuration,
    request: &Request,
    before_send: Option<&(dyn Fn() + Send + Sync)>,
) -> AttemptResult {
    let token = &request.shared.token;
    if token.is_cancelled() {
        return AttemptResult::failed(Error::cancelled(&request.method, &request.uri_text));
    }

    let merged = merge_headers(config.default_headers(), &request.headers);
    let (params, mut headers) =
        match apply_outgoing(&request.middleware, request.params.clone(), merged) {
            Ok(processed) => processed,
            Err(error) => return AttemptResult::failed(error),
        };

    let (uri, uri_text, body) = if params_bind_to_query(&request.method, request.body_encoding) {
        let pairs = match params_as_pairs(&params) {
            Ok(pairs) => pairs,
            Err(error) => return AttemptResult::failed(error),
        };
        let uri_text = append_query_pairs(&request.uri_text, &pairs);
        let uri: Uri = match uri_text.parse() {
            Ok(uri) => uri,
            Err(_) => {
                return AttemptResult::failed(Error::InvalidUrl { url: uri_text });
            }
        };
        (uri, uri_text, None)
    } else {
        let encoded = match encode_body(request.body_encoding, &params, &request.parts) {
            Ok(encoded) => encoded,
            Err(error) => return AttemptResult::failed(error),
        };
        if let Some(content_type) = encoded.content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, content_type);
        }
        (request.uri.clone(), request.uri_text.clone(), encoded.bytes)
    };

    let transport_request = TransportRequest {
        method: request.method.clone(),
        uri,
        headers,
        body,
        timeout: request.timeout.unwrap_or_else(|| config.timeout()),
        upload_progress: request.upload_progress.clone(),
        download_progress: request.download_progress.clone(),
    };

    debug!(
        method = %request.method,
        uri = %uri_text,
        attempt = request.retry_count() + 1,
        "sending request"
    );
    if let Some(hook) = before_send {
        hook();
    }

    let reply = tokio::select! {
        reply = transport.send(transport_request) => reply,
        _ = token.cancelled() => {
            return AttemptResult::failed(Error::cancelled(&request.method, &uri_text));
        }
    };
    if token.is_cancelled() {
        return AttemptResult::failed(Error::cancelled(&request.method, &uri_text));
    }

    let reply = match reply {
        Ok(reply) => reply,
        Err(error) => {
            warn!(method = %request.method, uri = %uri_text, error = %error, "transport failed");
            return AttemptResult::failed(error);
        }
    };

    let status_policy = request
        .status_policy
        .as_ref()
        .unwrap_or_else(|| config.status_policy());
    if !status_policy.is_success(reply.status) {
        let error = Error::NotSuccess {
            status: reply.status.as_u16(),
            method: request.method.clone(),
            uri: uri_text,
            body: truncate_body(&reply.body),
        };
        return AttemptResult::Failure {
            status: Some(reply.status),
            body: Some(reply.body),
            error,
        };
    }

    let allow_empty = request
        .allow_empty_body
        .unwrap_or_else(|| config.allow_empty_body());
    if reply.body.is_empty() && !allow_empty && !empty_body_is_expected(&request.method, reply.status)
    {
        return AttemptResult::Failure {
            status: Some(reply.status),
            body: Some(reply.body),
            error: Error::EmptyResponseBody {
                method: request.method.clone(),
                uri: uri_text,
            },
        };
    }

    match apply_incoming(&request.middleware, reply.body.clone()) {
        Ok(body) => AttemptResult::Success(Response::new(reply.status, reply.headers, body)),
        Err(error) => AttemptResult::Failure {
            status: Some(reply.status),
            body: Some(reply.body),
            error,
        },
    }
}

/// Consults the interceptor chain for a failed attempt. Cancellation is never
/// retried.
pub(crate) fn retry_decision(
    request: &Request,
    status: Option<StatusCode>,
    body: Option<&Bytes>,
    error: &Error,
) -> InterceptionAction {
    if error.code() == crate::error::ErrorCode::Cancelled {
        return InterceptionAction::Continue;
    }
    consult(
        &request.interceptors,
        &AttemptRecord {
            method: &request.method,
            uri: &request.uri_text,
            status,
            body,
            error,
            retry_count: request.retry_count(),
        },
    )
}

/// The standalone attempt loop used by direct sends: attempt, consult
/// interceptors, sleep and resend on `Retry`, settle otherwise. Queued
/// requests run the same pieces through the queue's worker so slots are
/// released across retry delays.
pub(crate) async fn run(
    transport: &dyn Transport,
    config: &Configuration,
    request: &Request,
) -> Result<Response> {
    let shared = request.shared();
    loop {
        shared.set_state(RequestState::Active);
        match attempt_once(transport, config, request, None).await {
            AttemptResult::Success(response) => {
                shared.set_state(RequestState::Completed);
                return Ok(response);
            }
            AttemptResult::Failure {
                status,
                body,
                error,
            } => {
                match retry_decision(request, status, body.as_ref(), &error) {
                    InterceptionAction::Retry { delay } => {
                        debug!(
                            method = %request.method,
                            uri = %request.uri_text,
                            delay_ms = delay.as_millis() as u64,
                            "interceptor requested retry"
                        );
                        shared.retry_count.fetch_add(1, Ordering::AcqRel);
                        shared.set_state(RequestState::RetryPending);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shared.token.cancelled() => {
                                shared.set_state(RequestState::Cancelled);
                                return Err(Error::cancelled(&request.method, &request.uri_text));
                            }
                        }
                        shared.set_state(RequestState::Queued);
                    }
                    InterceptionAction::Continue => {
                        if error.code() == crate::error::ErrorCode::Cancelled {
                            shared.set_state(RequestState::Cancelled);
                        } else {
                            shared.set_state(RequestState::Failed);
                        }
                        return Err(error);
                    }
                }
            }
        }
    }
}
