//! Request body inflation for the user service
//!
//! Runs ahead of routing: a `Content-Encoding` of exactly `gzip` or `deflate`
//! (case-insensitive) replaces the body with its decompressed bytes. Any other
//! encoding is passed through untouched.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use flate2::{read::MultiGzDecoder, Decompress, FlushDecompress, Status};
use std::io::Read;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("{0}")]
    Gzip(#[source] std::io::Error),

    #[error("{0}")]
    Inflate(#[from] flate2::DecompressError),

    #[error("incomplete or truncated stream")]
    Truncated,

    #[error("failed to read request body: {0}")]
    Body(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Gzip,
    Deflate,
}

impl BodyEncoding {
    /// Only the exact lowercase token counts; `" gzip"` or `"gzip, br"` do not.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "gzip" => Some(BodyEncoding::Gzip),
            "deflate" => Some(BodyEncoding::Deflate),
            _ => None,
        }
    }
}

/// Decode `raw` according to `encoding`.
///
/// `deflate` accepts both zlib-wrapped and raw deflate streams, trying the
/// zlib wrapper first. An empty gzip body decodes to an empty body; an empty
/// deflate body is a truncated stream.
pub fn decode_body(encoding: BodyEncoding, raw: &[u8]) -> Result<Vec<u8>, DecompressError> {
    match encoding {
        BodyEncoding::Gzip => {
            let mut data = Vec::new();
            if raw.is_empty() {
                return Ok(data);
            }
            MultiGzDecoder::new(raw)
                .read_to_end(&mut data)
                .map_err(DecompressError::Gzip)?;
            Ok(data)
        }
        BodyEncoding::Deflate => match inflate(raw, true) {
            Ok(data) => Ok(data),
            Err(err) => {
                debug!("zlib inflate failed ({}), retrying as raw deflate", err);
                inflate(raw, false)
            }
        },
    }
}

fn inflate(raw: &[u8], zlib_header: bool) -> Result<Vec<u8>, DecompressError> {
    let mut decoder = Decompress::new(zlib_header);
    let mut out = Vec::with_capacity(raw.len().saturating_mul(4).max(64));

    loop {
        let consumed = decoder.total_in() as usize;
        let status = decoder.decompress_vec(&raw[consumed..], &mut out, FlushDecompress::Finish)?;
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    let extra = out.capacity().max(64);
                    out.reserve(extra);
                    continue;
                }
                return Err(DecompressError::Truncated);
            }
        }
    }
}

/// Middleware: inflate compressed request bodies before they reach a handler
pub async fn decompress_request(req: Request, next: Next) -> Response {
    let encoding = req
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(BodyEncoding::from_header);

    let Some(encoding) = encoding else {
        return next.run(req).await;
    };

    let (mut parts, body) = req.into_parts();
    let decoded = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(raw) => decode_body(encoding, &raw),
        Err(e) => Err(DecompressError::Body(e.to_string())),
    };

    match decoded {
        Ok(data) => {
            debug!("Inflated {:?} request body to {} bytes", encoding, data.len());
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(data.len()));
            next.run(Request::from_parts(parts, Body::from(data))).await
        }
        Err(e) => {
            warn!("Rejecting request with undecodable body: {}", e);
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to decompress request body: {}", e),
            )
                .into_response()
        }
    }
}
