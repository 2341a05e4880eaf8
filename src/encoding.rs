//! Content-Encoding / Accept-Encoding negotiation (RFC 7231 §3.1.2,
//! RFC 7230 §4.2).
//!
//! Request bodies that arrive gzip- or deflate-encoded are inflated before
//! the rest of the pipeline ever sees them; response bodies are compressed
//! according to what the client declared acceptable via `Accept-Encoding`.
//! Everything here operates on fully-buffered `Vec<u8>`s: there is no
//! streaming (de)compression, so a `PUT`/`PATCH` whose body is itself
//! encoded is rejected rather than inflated on the fly (see `DESIGN.md`).

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use http::{HeaderMap, StatusCode};

use crate::errors::DavError;
use crate::DavResult;

/// A single content-coding this crate knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coding {
    Identity,
    Gzip,
    Deflate,
}

impl Coding {
    fn from_token(tok: &str) -> Option<Coding> {
        match tok.trim().to_ascii_lowercase().as_str() {
            "identity" => Some(Coding::Identity),
            "gzip" | "x-gzip" => Some(Coding::Gzip),
            "deflate" => Some(Coding::Deflate),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Coding::Identity => "identity",
            Coding::Gzip => "gzip",
            Coding::Deflate => "deflate",
        }
    }
}

// One entry of a parsed Accept-Encoding list: the coding (or an opaque,
// unsupported token we keep around so a "*;q=0, unsupportedthing" still
// parses) plus its q-value.
struct Candidate {
    token: String,
    q:     f32,
}

fn parse_accept_encoding(value: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut pieces = part.split(';');
        let token = pieces.next().unwrap_or("").trim().to_string();
        let mut q = 1.0f32;
        for param in pieces {
            let param = param.trim();
            if let Some(rest) = param.strip_prefix("q=") {
                q = rest.trim().parse().unwrap_or(1.0);
            }
        }
        out.push(Candidate { token, q });
    }
    out
}

/// Negotiate which content-coding the response should be sent with.
///
/// No `Accept-Encoding` header at all means "identity only" (RFC 7231
/// §5.3.4). Otherwise we pick the highest-q supported coding we have,
/// breaking ties gzip > deflate > identity; if every coding we support
/// (including identity) ends up excluded (q=0, or `identity` explicitly
/// given q=0 with nothing else acceptable), the request cannot be
/// satisfied and the caller should answer `406 Not Acceptable`.
pub(crate) fn negotiate_response_encoding(headers: &HeaderMap) -> Result<Coding, StatusCode> {
    let raw = match headers.get(http::header::ACCEPT_ENCODING).and_then(|v| v.to_str().ok()) {
        Some(v) => v,
        None => return Ok(Coding::Identity),
    };
    let candidates = parse_accept_encoding(raw);
    if candidates.is_empty() {
        return Ok(Coding::Identity);
    }

    let q_of = |coding: Coding| -> Option<f32> {
        let mut star_q: Option<f32> = None;
        for c in &candidates {
            if c.token == "*" {
                star_q = Some(c.q);
            }
            if let Some(tok_coding) = Coding::from_token(&c.token) {
                if tok_coding == coding {
                    return Some(c.q);
                }
            }
        }
        star_q
    };

    // preference order: gzip, deflate, identity.
    let mut best: Option<(Coding, f32)> = None;
    for coding in [Coding::Gzip, Coding::Deflate, Coding::Identity] {
        if let Some(q) = q_of(coding) {
            if q > 0.0 {
                match best {
                    Some((_, bq)) if bq >= q => {},
                    _ => best = Some((coding, q)),
                }
            }
        }
    }

    match best {
        Some((coding, _)) => Ok(coding),
        None => {
            // Nothing explicitly acceptable. identity is implicitly allowed
            // unless it (or "*") was explicitly given q=0.
            let identity_excluded = candidates
                .iter()
                .any(|c| (c.token.eq_ignore_ascii_case("identity") || c.token == "*") && c.q == 0.0);
            if identity_excluded {
                Err(StatusCode::NOT_ACCEPTABLE)
            } else {
                Ok(Coding::Identity)
            }
        },
    }
}

/// Decode a request body per its `Content-Encoding` header.
///
/// A missing header, or an explicit `identity`, is a no-op. Anything else
/// unknown, or more than one coding stacked (`gzip, deflate`), is rejected
/// with `415 Unsupported Media Type` -- we only ever apply a single coding.
pub(crate) fn decode_request_body(headers: &HeaderMap, data: Vec<u8>) -> DavResult<Vec<u8>> {
    let raw = match headers.get(http::header::CONTENT_ENCODING).and_then(|v| v.to_str().ok()) {
        Some(v) => v,
        None => return Ok(data),
    };
    let tokens: Vec<&str> = raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    match tokens.as_slice() {
        [] => Ok(data),
        [one] => match Coding::from_token(one) {
            Some(Coding::Identity) => Ok(data),
            Some(Coding::Gzip) => {
                let mut dec = GzDecoder::new(&data[..]);
                let mut out = Vec::new();
                dec.read_to_end(&mut out)
                    .map_err(|_| DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE))?;
                Ok(out)
            },
            Some(Coding::Deflate) => {
                let mut dec = DeflateDecoder::new(&data[..]);
                let mut out = Vec::new();
                dec.read_to_end(&mut out)
                    .map_err(|_| DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE))?;
                Ok(out)
            },
            None => Err(DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE)),
        },
        // stacked codings: not supported.
        _ => Err(DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE)),
    }
}

/// Compress a response body per the negotiated coding. `Coding::Identity`
/// is a no-op (returns the input unchanged).
pub(crate) fn encode_response_body(coding: Coding, data: &[u8]) -> DavResult<Vec<u8>> {
    use std::io::Write;
    match coding {
        Coding::Identity => Ok(data.to_vec()),
        Coding::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data)?;
            Ok(enc.finish()?)
        },
        Coding::Deflate => {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data)?;
            Ok(enc.finish()?)
        },
    }
}

impl Coding {
    pub(crate) fn header_value(self) -> Option<&'static str> {
        match self {
            Coding::Identity => None,
            other => Some(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(kv: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in kv {
            h.insert(
                http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                http::header::HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn no_accept_encoding_means_identity() {
        let h = headers(&[]);
        assert_eq!(negotiate_response_encoding(&h), Ok(Coding::Identity));
    }

    #[test]
    fn prefers_gzip_over_deflate_on_tie() {
        let h = headers(&[("accept-encoding", "deflate, gzip")]);
        assert_eq!(negotiate_response_encoding(&h), Ok(Coding::Gzip));
    }

    #[test]
    fn honors_q_values() {
        let h = headers(&[("accept-encoding", "gzip;q=0.1, deflate;q=0.9")]);
        assert_eq!(negotiate_response_encoding(&h), Ok(Coding::Deflate));
    }

    #[test]
    fn identity_explicitly_rejected_with_nothing_else_is_406() {
        let h = headers(&[("accept-encoding", "identity;q=0, gzip;q=0")]);
        assert_eq!(negotiate_response_encoding(&h), Err(StatusCode::NOT_ACCEPTABLE));
    }

    #[test]
    fn wildcard_q0_excludes_identity_too() {
        let h = headers(&[("accept-encoding", "*;q=0")]);
        assert_eq!(negotiate_response_encoding(&h), Err(StatusCode::NOT_ACCEPTABLE));
    }

    #[test]
    fn gzip_roundtrips() {
        let data = b"hello webdav world, this is some body content".to_vec();
        let encoded = encode_response_body(Coding::Gzip, &data).unwrap();
        assert_ne!(encoded, data);
        let headers = headers(&[("content-encoding", "gzip")]);
        let decoded = decode_request_body(&headers, encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn deflate_roundtrips() {
        let data = b"another body, deflated this time around".to_vec();
        let encoded = encode_response_body(Coding::Deflate, &data).unwrap();
        let headers = headers(&[("content-encoding", "deflate")]);
        let decoded = decode_request_body(&headers, encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn stacked_encodings_rejected() {
        let h = headers(&[("content-encoding", "gzip, deflate")]);
        let res = decode_request_body(&h, vec![1, 2, 3]);
        assert!(matches!(res, Err(DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE))));
    }

    #[test]
    fn unknown_encoding_rejected() {
        let h = headers(&[("content-encoding", "br")]);
        let res = decode_request_body(&h, vec![1, 2, 3]);
        assert!(matches!(res, Err(DavError::Status(StatusCode::UNSUPPORTED_MEDIA_TYPE))));
    }
}
