use bytes::Bytes;
use http::header::HeaderValue;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// Ordered request parameters. A key carrying `Value::Null` is distinct from
/// an absent key and survives every body encoding.
pub type Params = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyEncoding {
    #[default]
    UrlEncoded,
    Json,
    Multipart,
}

#[derive(Clone, Debug)]
pub struct MultipartPart {
    name: String,
    kind: MultipartKind,
}

#[derive(Clone, Debug)]
enum MultipartKind {
    Text(String),
    Bytes {
        data: Bytes,
        filename: Option<String>,
        content_type: Option<String>,
    },
}

impl MultipartPart {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MultipartKind::Text(value.into()),
        }
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            kind: MultipartKind::Bytes {
                data: data.into(),
                filename: None,
                content_type: None,
            },
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        if let MultipartKind::Bytes {
            filename: slot, ..
        } = &mut self.kind
        {
            *slot = Some(filename.into());
        }
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        if let MultipartKind::Bytes {
            content_type: slot, ..
        } = &mut self.kind
        {
            *slot = Some(content_type.into());
        }
        self
    }
}

pub(crate) struct EncodedBody {
    pub(crate) bytes: Option<Bytes>,
    pub(crate) content_type: Option<HeaderValue>,
}

impl EncodedBody {
    fn empty() -> Self {
        Self {
            bytes: None,
            content_type: None,
        }
    }
}

/// Encodes the frozen params/parts into wire bytes plus the matching
/// content-type. Malformed param shapes were already rejected at build time;
/// middleware can still reintroduce them, so the checks run here too.
pub(crate) fn encode_body(
    encoding: BodyEncoding,
    params: &Params,
    parts: &[MultipartPart],
) -> Result<EncodedBody> {
    match encoding {
        BodyEncoding::Json => {
            if params.is_empty() {
                return Ok(EncodedBody::empty());
            }
            let bytes = serde_json::to_vec(&Value::Object(params.clone()))
                .map_err(|source| Error::SerializeJson { source })?;
            Ok(EncodedBody {
                bytes: Some(Bytes::from(bytes)),
                content_type: Some(HeaderValue::from_static("application/json")),
            })
        }
        BodyEncoding::UrlEncoded => {
            if params.is_empty() {
                return Ok(EncodedBody::empty());
            }
            let pairs = params_as_pairs(params)?;
            let encoded = serde_urlencoded::to_string(&pairs)
                .map_err(|source| Error::SerializeForm { source })?;
            Ok(EncodedBody {
                bytes: Some(Bytes::from(encoded)),
                content_type: Some(HeaderValue::from_static(
                    "application/x-www-form-urlencoded",
                )),
            })
        }
        BodyEncoding::Multipart => {
            let mut all_parts: Vec<MultipartPart> = params
                .iter()
                .map(|(name, value)| {
                    Ok(MultipartPart::text(name.clone(), scalar_text(name, value)?))
                })
                .collect::<Result<_>>()?;
            all_parts.extend(parts.iter().cloned());
            if all_parts.is_empty() {
                return Ok(EncodedBody::empty());
            }
            let boundary = generate_boundary();
            let body = assemble_multipart(&all_parts, &boundary);
            let content_type =
                HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))
                    .map_err(|source| Error::InvalidHeaderValue {
                        name: "content-type".to_owned(),
                        source,
                    })?;
            Ok(EncodedBody {
                bytes: Some(body),
                content_type: Some(content_type),
            })
        }
    }
}

/// Flattens params for form encoding. Null values keep their key with an
/// empty value so presence stays observable on the wire.
pub(crate) fn params_as_pairs(params: &Params) -> Result<Vec<(String, String)>> {
    params
        .iter()
        .map(|(name, value)| Ok((name.clone(), scalar_text(name, value)?)))
        .collect()
}

fn scalar_text(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Array(_) | Value::Object(_) => Err(Error::InvalidParam {
            name: name.to_owned(),
            message: "nested values require json body encoding".to_owned(),
        }),
    }
}

pub(crate) fn validate_params(encoding: BodyEncoding, params: &Params) -> Result<()> {
    match encoding {
        BodyEncoding::Json => Ok(()),
        BodyEncoding::UrlEncoded | BodyEncoding::Multipart => {
            for (name, value) in params {
                scalar_text(name, value)?;
            }
            Ok(())
        }
    }
}

fn generate_boundary() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("reqrun-{suffix}")
}

fn assemble_multipart(parts: &[MultipartPart], boundary: &str) -> Bytes {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match &part.kind {
            MultipartKind::Text(value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                        part.name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            MultipartKind::Bytes {
                data,
                filename,
                content_type,
            } => {
                let mut disposition =
                    format!("Content-Disposition: form-data; name=\"{}\"", part.name);
                if let Some(filename) = filename {
                    disposition.push_str(&format!("; filename=\"{filename}\""));
                }
                disposition.push_str("\r\n");
                body.extend_from_slice(disposition.as_bytes());
                let content_type = content_type.as_deref().unwrap_or("application/octet-stream");
                body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Bytes::from(body)
}
