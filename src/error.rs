use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stable machine-readable error codes. `Error::code` maps every variant onto
/// this table; integrations match on codes rather than variant shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    InvalidParam,
    EnvironmentNotConfigured,
    Network,
    Timeout,
    NotSuccess,
    EmptyResponseBody,
    DeserializeJson,
    CannotConvertToString,
    InvalidImageData,
    DownloadFileNotSaved,
    TransformationFailed,
    Middleware,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    SerializeForm,
    RequestBuild,
    TransportInit,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::InvalidParam => "invalid_param",
            Self::EnvironmentNotConfigured => "environment_not_configured",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::NotSuccess => "not_success",
            Self::EmptyResponseBody => "empty_response_body",
            Self::DeserializeJson => "deserialize_json",
            Self::CannotConvertToString => "cannot_convert_to_string",
            Self::InvalidImageData => "invalid_image_data",
            Self::DownloadFileNotSaved => "download_file_not_saved",
            Self::TransformationFailed => "transformation_failed",
            Self::Middleware => "middleware",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::RequestBuild => "request_build",
            Self::TransportInit => "transport_init",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn all() -> [ErrorCode; 20] {
        [
            Self::InvalidUrl,
            Self::InvalidParam,
            Self::EnvironmentNotConfigured,
            Self::Network,
            Self::Timeout,
            Self::NotSuccess,
            Self::EmptyResponseBody,
            Self::DeserializeJson,
            Self::CannotConvertToString,
            Self::InvalidImageData,
            Self::DownloadFileNotSaved,
            Self::TransformationFailed,
            Self::Middleware,
            Self::InvalidHeaderName,
            Self::InvalidHeaderValue,
            Self::SerializeJson,
            Self::SerializeForm,
            Self::RequestBuild,
            Self::TransportInit,
            Self::Cancelled,
        ]
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request url: {url}")]
    InvalidUrl { url: String },
    #[error("invalid request param {name}: {message}")]
    InvalidParam { name: String, message: String },
    #[error("no base url configured for relative path {path}")]
    EnvironmentNotConfigured { path: String },
    #[error("network error for {method} {uri}: {source}")]
    Network {
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("non-success status {status} for {method} {uri}: {body}")]
    NotSuccess {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("empty response body for {method} {uri}")]
    EmptyResponseBody { method: Method, uri: String },
    #[error("failed to decode response json: {source}; body={body}")]
    DeserializeJson {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("response body is not valid utf-8: {source}")]
    CannotConvertToString {
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("response bytes are not a supported image format")]
    InvalidImageData,
    #[error("failed to save download to {path}: {source}")]
    DownloadFileNotSaved {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("response transformation failed: {message}")]
    TransformationFailed { message: String },
    #[error("middleware rejected the request: {message}")]
    Middleware { message: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to initialize transport: {message}")]
    TransportInit { message: String },
    #[error("request was cancelled: {method} {uri}")]
    Cancelled { method: Method, uri: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidParam { .. } => ErrorCode::InvalidParam,
            Self::EnvironmentNotConfigured { .. } => ErrorCode::EnvironmentNotConfigured,
            Self::Network { .. } => ErrorCode::Network,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::NotSuccess { .. } => ErrorCode::NotSuccess,
            Self::EmptyResponseBody { .. } => ErrorCode::EmptyResponseBody,
            Self::DeserializeJson { .. } => ErrorCode::DeserializeJson,
            Self::CannotConvertToString { .. } => ErrorCode::CannotConvertToString,
            Self::InvalidImageData => ErrorCode::InvalidImageData,
            Self::DownloadFileNotSaved { .. } => ErrorCode::DownloadFileNotSaved,
            Self::TransformationFailed { .. } => ErrorCode::TransformationFailed,
            Self::Middleware { .. } => ErrorCode::Middleware,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::TransportInit { .. } => ErrorCode::TransportInit,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    pub fn middleware(message: impl Into<String>) -> Self {
        Self::Middleware {
            message: message.into(),
        }
    }

    pub fn transformation(message: impl Into<String>) -> Self {
        Self::TransformationFailed {
            message: message.into(),
        }
    }

    pub(crate) fn cancelled(method: &Method, uri: &str) -> Self {
        Self::Cancelled {
            method: method.clone(),
            uri: uri.to_owned(),
        }
    }
}
