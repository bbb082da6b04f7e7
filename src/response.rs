use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::util::truncate_body;

/// A settled successful exchange: status, headers, and the response bytes
/// after incoming middleware ran.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| Error::DeserializeJson {
            source,
            body: truncate_body(&self.body),
        })
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|source| Error::CannotConvertToString { source })
    }

    /// Decodes JSON into the intermediate model, then maps it through the
    /// transformer.
    pub fn transform<M, T>(&self, transformer: &dyn Transformer<M, T>) -> Result<T>
    where
        M: DeserializeOwned,
    {
        let model: M = self.json()?;
        transformer.transform(model)
    }

    /// Sniffs the body for a known image signature. Fails with
    /// `InvalidImageData` when none matches.
    pub fn image(&self) -> Result<ImageData> {
        let format = sniff_image_format(&self.body).ok_or(Error::InvalidImageData)?;
        Ok(ImageData {
            format,
            bytes: self.body.clone(),
        })
    }
}

/// Maps a decoded response model onto a caller-facing shape. Implemented for
/// plain closures `Fn(Input) -> Result<Output>`.
pub trait Transformer<Input, Output>: Send + Sync {
    fn transform(&self, input: Input) -> Result<Output>;
}

impl<F, Input, Output> Transformer<Input, Output> for F
where
    F: Fn(Input) -> Result<Output> + Send + Sync,
{
    fn transform(&self, input: Input) -> Result<Output> {
        self(input)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

#[derive(Clone, Debug)]
pub struct ImageData {
    pub format: ImageFormat,
    pub bytes: Bytes,
}

pub(crate) fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return Some(ImageFormat::Png);
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some(ImageFormat::Jpeg);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(ImageFormat::Webp);
    }
    if bytes.starts_with(b"BM") {
        return Some(ImageFormat::Bmp);
    }
    None
}
