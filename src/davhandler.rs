//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::buf::Buf;

use futures_util::stream::{Stream, StreamExt};

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::{Body, InBody};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::encoding::{self, Coding};
use crate::util::{dav_method, notfound, DavMethod as Method, DavMethodSet};

use crate::errors::DavError;
use crate::fs::*;
use crate::ls::*;
use crate::propstore::PropertyStore;
use crate::DavResult;

/// The webdav handler struct.
///
/// The `new` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    config: Arc<DavConfig>,
}

/// Configuration of the handler.
#[derive(Default)]
pub struct DavConfig {
    /// Prefix to be stripped off when handling request.
    pub prefix: Option<String>,
    /// Filesystem backend.
    pub fs: Option<Box<dyn DavFileSystem>>,
    /// Locksystem backend.
    pub ls: Option<Box<dyn DavLockSystem>>,
    /// Dead-property backend. `None` means PROPPATCH on non-live properties
    /// always fails with `FORBIDDEN`.
    pub ps: Option<Box<dyn PropertyStore>>,
    /// Set of allowed methods (None means "all methods")
    pub allow: Option<DavMethodSet>,
    /// Principal is webdav speak for "user", used to give locks an owner (if a locksystem is
    /// active).
    pub principal: Option<String>,
    /// Hide symbolic links? `None` maps to `true`.
    pub hide_symlinks: Option<bool>,
    /// Render an HTML directory listing for GET on a collection. `None` maps to `false`.
    pub autoindex: Option<bool>,
}

impl DavConfig {
    /// Create a new configuration builder.
    pub fn new() -> DavConfig {
        DavConfig::default()
    }

    /// Use the configuration that was built to generate a DavConfig.
    pub fn build_handler(self) -> DavHandler {
        DavHandler{ config: Arc::new(self) }
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(self, prefix: String) -> Self {
        let mut this = self;
        this.prefix = Some(prefix);
        this
    }

    /// Set the filesystem to use.
    pub fn filesystem(self, fs: Box<dyn DavFileSystem>) -> Self {
        let mut this = self;
        this.fs = Some(fs);
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: Box<dyn DavLockSystem>) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Set the dead-property store to use.
    pub fn propertystore(self, ps: Box<dyn PropertyStore>) -> Self {
        let mut this = self;
        this.ps = Some(ps);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn allow_methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = Some(allow);
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: String) -> Self {
        let mut this = self;
        this.principal = Some(principal);
        this
    }

    /// Hide symbolic links (default is true)
    pub fn hide_symlinks(self, hide: bool) -> Self {
        let mut this = self;
        this.hide_symlinks = Some(hide);
        this
    }

    /// Render an HTML directory listing on GET of a collection (default is false).
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = Some(autoindex);
        this
    }
}

// The actual inner struct.
//
// At the start of the request, DavConfig is used to generate
// a DavInner struct. DavInner::handle then handles the request.
pub(crate) struct DavInner {
    pub prefix:        String,
    pub fs:            Box<dyn DavFileSystem>,
    pub ls:            Option<Box<dyn DavLockSystem>>,
    pub ps:            Option<Box<dyn PropertyStore>>,
    pub allow:         Option<DavMethodSet>,
    pub principal:     Option<String>,
    pub hide_symlinks: Option<bool>,
    pub autoindex:     Option<bool>,
}

impl From<DavConfig> for DavInner {
    fn from(cfg: DavConfig) -> Self {
        DavInner {
            prefix:        cfg.prefix.unwrap_or("".to_string()),
            fs:            cfg.fs.unwrap(),
            ls:            cfg.ls,
            ps:            cfg.ps,
            allow:         cfg.allow,
            principal:     cfg.principal,
            hide_symlinks: cfg.hide_symlinks,
            autoindex:     cfg.autoindex,
        }
    }
}

impl From<&DavConfig> for DavInner {
    fn from(cfg: &DavConfig) -> Self {
        DavInner {
            prefix:        cfg
                .prefix
                .as_ref()
                .map(|p| p.to_owned())
                .unwrap_or("".to_string()),
            fs:            cfg.fs.clone().unwrap(),
            ls:            cfg.ls.clone(),
            ps:            cfg.ps.clone(),
            allow:         cfg.allow,
            principal:     cfg.principal.clone(),
            hide_symlinks: cfg.hide_symlinks,
            autoindex:     cfg.autoindex,
        }
    }
}

impl Clone for DavInner {
    fn clone(&self) -> Self {
        DavInner {
            prefix:        self.prefix.clone(),
            fs:            self.fs.clone(),
            ls:            self.ls.clone(),
            ps:            self.ps.clone(),
            allow:         self.allow,
            principal:     self.principal.clone(),
            hide_symlinks: self.hide_symlinks,
            autoindex:     self.autoindex,
        }
    }
}

impl DavHandler {
    /// Create a new `DavHandler`.
    ///
    /// This returns a DavHandler with an empty configuration. That's only
    /// useful if you use the `handle_with` method instead of `handle`.
    /// Normally you should create a new `DavHandler` using `DavHandler::build`
    /// and configure at least a filesystem.
    pub fn new() -> DavHandler {
        DavHandler{ config: Arc::new(DavConfig::default()) }
    }

    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// Handle a webdav request.
    ///
    /// Only one error kind is ever returned: `ErrorKind::BrokenPipe`. In that case we
    /// were not able to generate a response at all, and the server should just
    /// close the connection.
    pub async fn handle<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> io::Result<Response<Body>>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: http_body::Body<Data = ReqData, Error = ReqError> + Send,
    {
        if self.config.fs.is_none() {
            return Ok(notfound());
        }
        let inner = DavInner::from(&*self.config);
        inner.handle(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request.
    ///
    /// Or, the default config has no locksystem, and you pass in
    /// a fake locksystem (`FakeLs`) because this is a request from a
    /// windows or macos client that needs to see locking support.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        config: DavConfig,
        req: Request<ReqBody>,
    ) -> io::Result<Response<Body>>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: http_body::Body<Data = ReqData, Error = ReqError> + Send,
    {
        let orig = &*self.config;
        let newconf = DavConfig {
            prefix:        config.prefix.or(orig.prefix.clone()),
            fs:            config.fs.or(orig.fs.clone()),
            ls:            config.ls.or(orig.ls.clone()),
            ps:            config.ps.or(orig.ps.clone()),
            allow:         config.allow.or(orig.allow),
            principal:     config.principal.or(orig.principal.clone()),
            hide_symlinks: config.hide_symlinks.or(orig.hide_symlinks),
            autoindex:     config.autoindex.or(orig.autoindex),
        };
        if newconf.fs.is_none() {
            return Ok(notfound());
        }
        let inner = DavInner::from(newconf);
        inner.handle(req).await
    }
}

impl DavInner {
    // helper.
    pub(crate) async fn has_parent<'a>(&'a self, path: &'a DavPath) -> bool {
        let p = path.parent();
        self.fs.metadata(&p).await.map(|m| m.is_dir()).unwrap_or(false)
    }

    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavPath {
        // This never fails (has been checked before)
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix).unwrap()
    }

    // See if this is a directory and if so, if we have
    // to fixup the path by adding a slash at the end.
    pub(crate) fn fixpath(
        &self,
        res: &mut Response<Body>,
        path: &mut DavPath,
        meta: Box<dyn DavMetaData>,
    ) -> Box<dyn DavMetaData>
    {
        if meta.is_dir() && !path.is_collection() {
            path.add_slash();
            let newloc = path.with_prefix().as_url_string();
            res.headers_mut()
                .typed_insert(davheaders::ContentLocation(newloc));
        }
        meta
    }

    // drain request body and return length.
    pub(crate) async fn read_request<'a, ReqBody, ReqError>(
        &'a self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: Stream<Item = Result<bytes::Bytes, ReqError>> + Send + 'a,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        futures_util::pin_mut!(body);
        while let Some(res) = body.next().await {
            let chunk = res.map_err(|_| {
                DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            if data.len() + chunk.len() > max_size {
                return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle<ReqBody, ReqData, ReqError>(self, req: Request<ReqBody>) -> io::Result<Response<Body>>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: http_body::Body<Data = ReqData, Error = ReqError> + Send,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), InBody::from(body))
        };

        let is_ms = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .map(|s| s.contains("Microsoft"))
            .unwrap_or(false);

        // Turn any DavError results into a HTTP error response.
        match self.handle2(req, body).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                Ok(resp)
            },
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::builder();
                if is_ms && err.statuscode() == StatusCode::NOT_FOUND {
                    // This is an attempt to convince Windows to not
                    // cache a 404 NOT_FOUND for 30-60 seconds.
                    //
                    // That is a problem since windows caches the NOT_FOUND in a
                    // case-insensitive way. So if "www" does not exist, but "WWW" does,
                    // and you do a "dir www" and then a "dir WWW" the second one
                    // will fail.
                    //
                    // Ofcourse the below is not sufficient. Fixes welcome.
                    resp.header("Cache-Control", "no-store, no-cache, must-revalidate");
                    resp.header("Progma", "no-cache");
                    resp.header("Expires", "0");
                    resp.header("Vary", "*");
                }
                resp.status(err.statuscode());
                if err.must_close() {
                    resp.header("connection", "close");
                }
                let body = match &err {
                    DavError::Locked(lock, elem) => {
                        resp.header("content-type", "application/xml; charset=utf-8");
                        crate::handle_lock::locked_error_body(lock, elem).unwrap_or_else(|_| Body::empty())
                    },
                    _ => {
                        resp.header("Content-Length", "0");
                        Body::empty()
                    },
                };
                let resp = resp.body(body).unwrap();
                Ok(resp)
            },
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqError>(self, req: Request<()>, body: ReqBody) -> DavResult<Response<Body>>
    where
        ReqBody: Stream<Item = Result<bytes::Bytes, ReqError>> + Send,
        ReqError: StdError + Send + Sync + 'static,
    {
        // debug when running the webdav litmus tests.
        if log_enabled!(log::Level::Debug) {
            if let Some(t) = req.headers().typed_get::<davheaders::XLitmus>() {
                debug!("X-Litmus: {:?}", t);
            }
        }

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            },
        };

        // see if method is allowed.
        if let Some(ref a) = self.allow {
            if !a.contains(method) {
                debug!("method {} not allowed on request {}", req.method(), req.uri());
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // figure out up-front what coding (if any) the response should be
        // sent with; a request that cannot be satisfied (identity excluded,
        // nothing else acceptable) is rejected before we do any work.
        let resp_coding = encoding::negotiate_response_encoding(req.headers())
            .map_err(DavError::Status)?;

        // the request body's own Content-Encoding, if any, must be a single
        // coding we know how to inflate; a streamed PUT/PATCH body that
        // claims a non-identity coding is rejected rather than decoded
        // incrementally (there is no streaming decompressor wired up here).
        let has_content_encoding = req
            .headers()
            .get(http::header::CONTENT_ENCODING)
            .map(|v| v.as_bytes() != b"identity")
            .unwrap_or(false);

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            Method::Put | Method::Patch => {
                if has_content_encoding {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
                (Some(body), Vec::new())
            },
            _ => {
                let raw = self.read_request(body, 65536).await?;
                let data = encoding::decode_request_body(req.headers(), raw)?;
                (None, data)
            },
        };

        // Not all methods accept a body.
        match method {
            Method::Put | Method::Patch | Method::PropFind | Method::PropPatch | Method::Lock | Method::Post => {},
            _ => {
                if body_data.len() > 0 {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            },
        }

        // The three methods that carry a WebDAV XML body get it scanned for
        // external/oversized entity declarations before it's ever handed to
        // the XML parser (§4.2 "XML parsing safety").
        match method {
            Method::PropFind | Method::PropPatch | Method::Lock if !body_data.is_empty() => {
                crate::xmlsafety::check_xml_safety(&body_data)?;
            },
            _ => {},
        }

        debug!("== START REQUEST {:?} {}", method, path);

        let res = match method {
            Method::Options => self.handle_options(&req).await,
            Method::PropFind => self.handle_propfind(&req, &body_data).await,
            Method::PropPatch => self.handle_proppatch(&req, &body_data).await,
            Method::MkCol => self.handle_mkcol(&req).await,
            Method::Delete => self.handle_delete(&req).await,
            Method::Lock => self.handle_lock(&req, &body_data).await,
            Method::Unlock => self.handle_unlock(&req).await,
            Method::Head | Method::Get => self.handle_get(&req).await,
            Method::Put | Method::Patch => self.handle_put(&req, body_strm.unwrap()).await,
            Method::Copy | Method::Move => self.handle_copymove(&req, method).await,
            Method::Post => self.handle_post(&req, &body_data).await,
        };

        match res {
            Ok(resp) => compress_response(resp_coding, resp).await,
            Err(e) => Err(e),
        }
    }
}

// Buffer the response body (whatever shape the handler produced it in)
// and, if a non-identity coding was negotiated, compress it and set the
// Content-Encoding/Content-Length headers accordingly. This is a
// buffer-then-compress implementation, not true streaming compression.
async fn compress_response(coding: Coding, mut resp: Response<Body>) -> DavResult<Response<Body>> {
    let coding_header = match coding.header_value() {
        Some(h) => h,
        None => return Ok(resp),
    };
    // a body-less response (e.g. 204, 304) has nothing to compress.
    if http_body::Body::is_end_stream(resp.body()) {
        return Ok(resp);
    }

    let owned_body = std::mem::replace(resp.body_mut(), Body::empty());
    let mut data = Vec::new();
    {
        futures_util::pin_mut!(owned_body);
        while let Some(chunk) = owned_body.next().await {
            let chunk = chunk.map_err(DavError::IoError)?;
            data.extend_from_slice(&chunk);
        }
    }
    let compressed = encoding::encode_response_body(coding, &data)?;

    let headers = resp.headers_mut();
    headers.insert(
        http::header::CONTENT_ENCODING,
        http::HeaderValue::from_static(coding_header),
    );
    headers.insert(
        http::header::CONTENT_LENGTH,
        http::HeaderValue::from_str(&compressed.len().to_string()).unwrap(),
    );

    *resp.body_mut() = Body::from(compressed);
    Ok(resp)
}
