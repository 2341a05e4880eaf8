use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{check_lock_tokens, if_match_get_tokens};
use crate::davheaders;
use crate::errors::DavError;
use crate::fs::FsError;
use crate::{DavInner, DavResult};

impl DavInner {
    pub(crate) async fn handle_mkcol(self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let mut path = self.path(&req);
        let meta = self.fs.metadata(&path).await;

        // check the If and If-* headers.
        let tokens = match if_match_get_tokens(&req, meta.as_ref().ok(), &self.fs, &self.ls, &path).await {
            Ok(t) => t,
            Err(s) => return Err(s.into()),
        };

        // if locked check if we hold that lock.
        let principal = self.principal.as_ref().map(|s| s.as_str());
        check_lock_tokens(&self.ls, &path, principal, &tokens, false)?;

        match self.fs.create_dir(&path).await {
            // RFC 4918 9.3.1 MKCOL Status Codes.
            Err(FsError::Exists) => Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED)),
            Err(FsError::NotFound) => Err(DavError::Status(StatusCode::CONFLICT)),
            Err(e) => Err(e.into()),
            Ok(()) => {
                if !path.is_collection() {
                    path.add_slash();
                    res.headers_mut()
                        .typed_insert(davheaders::ContentLocation(path.with_prefix().as_url_string()));
                }
                *res.status_mut() = StatusCode::CREATED;
                Ok(res)
            },
        }
    }
}
