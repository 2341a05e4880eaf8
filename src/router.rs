//! Multi-location routing on top of [`crate::davhandler::DavHandler`].
//!
//! A single `DavHandler` answers for one filesystem/locksystem/propertystore
//! combination mounted at one prefix. A [`Router`] sits above that: it holds
//! an ordered list of [`Location`]s (scheme/host/port/path match patterns,
//! each carrying its own authorization filter chain and its own handler),
//! picks the first one whose pattern matches the incoming request, runs its
//! filters, and only then hands the request to its handler.

use std::error::Error as StdError;
use std::io;
use std::sync::{Arc, RwLock};

use bytes::Buf;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};

use crate::body::Body;
use crate::davhandler::DavHandler;
use crate::util::notfound;

/// The parts of a request an [`AuthFilter`] or a [`MatchPattern`] needs to
/// look at, without taking ownership of (or needing to clone) the body.
#[derive(Clone)]
pub struct RequestHead {
    pub method:  Method,
    pub uri:     Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    fn from_request<B>(req: &Request<B>) -> RequestHead {
        RequestHead {
            method:  req.method().clone(),
            uri:     req.uri().clone(),
            headers: req.headers().clone(),
        }
    }

    /// The `Host` the request was addressed to: the URI's own authority if
    /// present (absolute-form requests), else the `Host:` header.
    fn host(&self) -> Option<&str> {
        self.uri
            .host()
            .or_else(|| self.headers.get(http::header::HOST).and_then(|h| h.to_str().ok()))
    }

    fn port(&self) -> Option<u16> {
        self.uri.port_u16()
    }
}

/// What an [`AuthFilter`] decided about a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Deny the request outright; the response carries this status.
    Deny(StatusCode),
    /// Allow the request; no further filters in the chain are consulted.
    Allow,
    /// Defer: let the next filter (or, if this was the last one, the
    /// service itself) decide.
    Abstain,
}

/// A per-request authorization check, consulted in configured order for
/// every request that matches the [`Location`] it is attached to.
pub trait AuthFilter: Send + Sync {
    fn check(&self, head: &RequestHead) -> FilterDecision;
}

/// A URI match pattern for a [`Location`]. `None` fields are wildcards.
#[derive(Debug, Clone, Default)]
pub struct MatchPattern {
    pub scheme: Option<String>,
    pub host:   Option<String>,
    pub port:   Option<u16>,
    /// Path prefix this location is mounted at, e.g. `/dav/`. A request
    /// path is accepted if it equals this (slash-insensitively) or starts
    /// with it as a path prefix.
    pub path: String,
}

impl MatchPattern {
    pub fn new(path: impl Into<String>) -> MatchPattern {
        MatchPattern {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    fn matches(&self, head: &RequestHead, case_sensitive: bool) -> bool {
        if let Some(ref scheme) = self.scheme {
            let req_scheme = head.uri.scheme_str();
            if !req_scheme.map(|s| s.eq_ignore_ascii_case(scheme)).unwrap_or(false) {
                return false;
            }
        }
        if let Some(ref host) = self.host {
            if !head.host().map(|h| h.eq_ignore_ascii_case(host)).unwrap_or(false) {
                return false;
            }
        }
        if let Some(port) = self.port {
            if head.port() != Some(port) {
                return false;
            }
        }

        let root = self.path.trim_end_matches('/');
        let req_path = head.uri.path();
        let req_trimmed = req_path.trim_end_matches('/');

        let eq = |a: &str, b: &str| if case_sensitive { a == b } else { a.eq_ignore_ascii_case(b) };

        // `/dav` and `/dav/` both match a location whose root is `/dav/`.
        if eq(req_trimmed, root) {
            return true;
        }
        let prefix = format!("{}/", root);
        if case_sensitive {
            req_path.starts_with(&prefix)
        } else {
            req_path.len() >= prefix.len() && req_path[..prefix.len()].eq_ignore_ascii_case(&prefix)
        }
    }
}

/// One configured mount point: a match pattern, its authorization chain,
/// and the handler instance (shared across requests, replaced wholesale
/// when `reset_on_error` is set and a request blows up).
pub struct Location {
    pattern:        MatchPattern,
    case_sensitive: bool,
    reset_on_error: bool,
    filters:        Vec<Box<dyn AuthFilter>>,
    factory:        Box<dyn Fn() -> DavHandler + Send + Sync>,
    current:        RwLock<Arc<DavHandler>>,
}

impl Location {
    /// Build a location whose handler is constructed afresh by `factory`
    /// (called once now, and again whenever `reset_on_error` fires).
    pub fn new<F>(pattern: MatchPattern, factory: F) -> Location
    where
        F: Fn() -> DavHandler + Send + Sync + 'static,
    {
        let handler = factory();
        Location {
            pattern,
            case_sensitive: false,
            reset_on_error: false,
            filters: Vec::new(),
            factory: Box::new(factory),
            current: RwLock::new(Arc::new(handler)),
        }
    }

    /// Match the path prefix case-sensitively (default: case-insensitive,
    /// matching typical DNS-derived hosting setups).
    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    /// On an unhandled (5xx) response, drop the shared handler instance so
    /// the next request gets a freshly constructed one.
    pub fn reset_on_error(mut self, yes: bool) -> Self {
        self.reset_on_error = yes;
        self
    }

    /// Append a filter to the authorization chain; filters run in the
    /// order they were added.
    pub fn filter(mut self, f: Box<dyn AuthFilter>) -> Self {
        self.filters.push(f);
        self
    }

    fn current_handler(&self) -> Arc<DavHandler> {
        self.current.read().unwrap().clone()
    }

    fn reset(&self) {
        if self.reset_on_error {
            let fresh = Arc::new((self.factory)());
            *self.current.write().unwrap() = fresh;
        }
    }

    // Deny(status) short-circuits; Allow short-circuits; Abstain falls
    // through to the next filter (or, if none deny/allow, to the service).
    fn authorize(&self, head: &RequestHead) -> Option<StatusCode> {
        for f in &self.filters {
            match f.check(head) {
                FilterDecision::Deny(status) => return Some(status),
                FilterDecision::Allow => return None,
                FilterDecision::Abstain => continue,
            }
        }
        None
    }
}

/// Maps incoming requests to a [`Location`], in configuration order:
/// the first location whose match pattern fits wins.
#[derive(Default)]
pub struct Router {
    locations: Vec<Location>,
}

impl Router {
    pub fn new() -> Router {
        Router { locations: Vec::new() }
    }

    pub fn location(mut self, loc: Location) -> Self {
        self.locations.push(loc);
        self
    }

    fn find(&self, head: &RequestHead) -> Option<&Location> {
        self.locations.iter().find(|l| l.pattern.matches(head, l.case_sensitive))
    }

    /// Route and handle a request.
    ///
    /// Filters run before the location's service is ever asked, so a
    /// denied `PUT`/`LOCK`/`MKCOL` against a URI that doesn't map to a
    /// resource never reaches the filesystem layer -- the filter's own
    /// status is returned instead of a `404` that would otherwise leak
    /// whether the target exists.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> io::Result<Response<Body>>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: http_body::Body<Data = ReqData, Error = ReqError> + Send,
    {
        let head = RequestHead::from_request(&req);

        let location = match self.find(&head) {
            Some(l) => l,
            None => return Ok(notfound()),
        };

        if let Some(status) = location.authorize(&head) {
            let resp = Response::builder()
                .status(status)
                .header("Content-Length", "0")
                .body(Body::empty())
                .unwrap();
            return Ok(resp);
        }

        let handler = location.current_handler();
        let resp = handler.handle(req).await?;
        if resp.status().is_server_error() {
            location.reset();
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakels::FakeLs;
    use crate::memfs::MemFs;

    fn handler() -> DavHandler {
        DavHandler::builder()
            .filesystem(MemFs::new())
            .locksystem(FakeLs::new())
            .strip_prefix("/dav".to_string())
            .build_handler()
    }

    fn router() -> Router {
        Router::new().location(Location::new(MatchPattern::new("/dav/"), handler))
    }

    #[tokio::test]
    async fn unmatched_location_is_404() {
        let r = router();
        let req = Request::builder()
            .method("GET")
            .uri("/elsewhere/")
            .body(Body::empty())
            .unwrap();
        let resp = r.handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bare_prefix_without_trailing_slash_matches() {
        let r = router();
        let req = Request::builder()
            .method("PROPFIND")
            .uri("/dav")
            .body(Body::empty())
            .unwrap();
        let resp = r.handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    }

    struct DenyAll(StatusCode);
    impl AuthFilter for DenyAll {
        fn check(&self, _head: &RequestHead) -> FilterDecision {
            FilterDecision::Deny(self.0)
        }
    }

    #[tokio::test]
    async fn denied_put_on_unmapped_uri_never_reaches_backend() {
        let r = Router::new().location(
            Location::new(MatchPattern::new("/dav/"), handler).filter(Box::new(DenyAll(StatusCode::FORBIDDEN))),
        );
        let req = Request::builder()
            .method("PUT")
            .uri("/dav/nonexistent.txt")
            .body(Body::from("hello"))
            .unwrap();
        let resp = r.handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
