//! `POST` (§2, §6.1 base methods; §9 "the source's handling of POST is
//! permissive"). The core has no WebDAV-mandated semantics for `POST` --
//! it reads the body, hands it and the `Content-Type` to
//! [`crate::fs::DavFileSystem::post`], and writes back whatever status,
//! content-type and body that call returns. A backend that doesn't
//! override `post` answers `501 Not Implemented`, same as any other
//! unimplemented `DavFileSystem` capability.
use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode as SC};

use crate::body::Body;
use crate::{DavInner, DavResult};

impl DavInner {
    pub(crate) async fn handle_post(self, req: &Request<()>, body: &[u8]) -> DavResult<Response<Body>> {
        let path = self.path(&req);
        let content_type = req
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        let (status, out_type, out_body) = self.fs.post(&path, content_type, Bytes::copy_from_slice(body)).await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = status;
        if let Some(ct) = out_type {
            res.headers_mut()
                .insert(http::header::CONTENT_TYPE, ct.parse().map_err(|_| SC::INTERNAL_SERVER_ERROR)?);
        }
        if !out_body.is_empty() {
            res.headers_mut().typed_insert(headers::ContentLength(out_body.len() as u64));
            *res.body_mut() = Body::from(out_body);
        }
        Ok(res)
    }
}
