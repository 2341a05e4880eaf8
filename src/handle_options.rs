use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::fs::DavMetaData;
use crate::util::{dav_method, DavMethod as Method};
use crate::{DavInner, DavResult};

impl DavInner {
    pub(crate) async fn handle_options(self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        {
            let h = res.headers_mut();
            let dav_compliance = if self.ls.is_some() {
                "1,2,3,sabredav-partialupdate"
            } else {
                "1,3,sabredav-partialupdate"
            };
            h.insert("dav", dav_compliance.parse().unwrap());
            h.insert("ms-author-via", "DAV".parse().unwrap());
            h.insert("content-length", "0".parse().unwrap());
        }

        let path = self.path(&req);
        let meta = self.fs.metadata(&path).await;
        let allow = self.allowed_methods(req, meta);
        res.headers_mut().insert("allow", allow.parse().unwrap());
        *res.status_mut() = StatusCode::OK;

        Ok(res)
    }

    // Build the `Allow:` header value: every method that is both configured
    // (`self.allow`) and makes sense given the current state of the path
    // (unmapped vs. collection vs. regular resource).
    fn allowed_methods(&self, req: &Request<()>, meta: crate::fs::FsResult<Box<dyn DavMetaData>>) -> String {
        let method = dav_method(req.method()).unwrap_or(Method::Options);
        let islock = |m| m == Method::Lock || m == Method::Unlock;
        let mm = |v: &mut Vec<&'static str>, m: &'static str, y: Method| {
            if (y == Method::Options || (y != method || islock(y) != islock(method)))
                && (!islock(y) || self.ls.is_some())
                && self.allow.as_ref().map_or(true, |x| x.contains(y))
            {
                v.push(m);
            }
        };

        let path = self.path(&req);
        let is_unmapped = meta.is_err();
        let is_file = meta.map(|m| m.is_file()).unwrap_or(false);
        let is_star = path.is_star() && method == Method::Options;

        let mut v = Vec::new();
        if is_unmapped && !is_star {
            mm(&mut v, "OPTIONS", Method::Options);
            mm(&mut v, "MKCOL", Method::MkCol);
            mm(&mut v, "PUT", Method::Put);
            mm(&mut v, "LOCK", Method::Lock);
            mm(&mut v, "POST", Method::Post);
        } else {
            if is_file || is_star {
                mm(&mut v, "HEAD", Method::Head);
                mm(&mut v, "GET", Method::Get);
                mm(&mut v, "PATCH", Method::Patch);
                mm(&mut v, "PUT", Method::Put);
            }
            mm(&mut v, "OPTIONS", Method::Options);
            mm(&mut v, "PROPFIND", Method::PropFind);
            mm(&mut v, "POST", Method::Post);
            mm(&mut v, "COPY", Method::Copy);
            if path.as_url_string() != "/" {
                mm(&mut v, "MOVE", Method::Move);
                mm(&mut v, "DELETE", Method::Delete);
            }
            mm(&mut v, "LOCK", Method::Lock);
            mm(&mut v, "UNLOCK", Method::Unlock);
        }

        v.join(",")
    }
}
