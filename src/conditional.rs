//! HTTP conditional request headers (RFC 7232) and the WebDAV `If:` header
//! (RFC 4918 10.4), plus a helper for the lock-token-submission rule that
//! every state-changing method has to apply before touching a locked
//! resource.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use headers::HeaderMapExt;
use http::{Method, StatusCode};

use crate::davheaders::{self, ETag, ETagList, If, IfItem, IfNoneMatch, IfRange};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{DavFileSystem, DavMetaData};
use crate::ls::DavLockSystem;

type Request = http::Request<()>;

// SystemTime has nanosecond precision, HttpDate has second precision.
fn round_time(tm: impl Into<SystemTime>) -> SystemTime {
    let tm = tm.into();
    match tm.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(_) => tm,
    }
}

fn etaglist_match(tags: &ETagList, exists: bool, tag: Option<&ETag>) -> bool {
    match tags {
        ETagList::Star => exists,
        ETagList::Tags(t) => match tag {
            Some(tag) => t.iter().any(|x| x == tag),
            None => false,
        },
    }
}

pub(crate) fn ifrange_match(hdr: &IfRange, tag: Option<&ETag>, date: Option<SystemTime>) -> bool {
    match (hdr, tag, date) {
        (IfRange::Date(d), _, Some(date)) => round_time(date) == round_time(*d),
        (IfRange::ETag(t), Some(tag), _) => t == tag,
        _ => false,
    }
}

/// RFC 7232 If-Match / If-None-Match / If-(Un)Modified-Since.
fn http_if_match(req: &Request, meta: Option<&Box<dyn DavMetaData>>) -> Option<StatusCode> {
    let file_modified = meta.and_then(|m| m.modified().ok());

    if let Some(r) = req.headers().typed_get::<davheaders::IfMatch>() {
        let etag = meta.and_then(ETag::from_meta);
        if !etaglist_match(&r.0, meta.is_some(), etag.as_ref()) {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(r) = req.headers().typed_get::<headers::IfUnmodifiedSince>() {
        match file_modified {
            None => return Some(StatusCode::PRECONDITION_FAILED),
            Some(file_modified) => {
                if round_time(file_modified) > round_time(r) {
                    return Some(StatusCode::PRECONDITION_FAILED);
                }
            }
        }
    }

    if let Some(r) = req.headers().typed_get::<IfNoneMatch>() {
        let etag = meta.and_then(ETag::from_meta);
        if etaglist_match(&r.0, meta.is_some(), etag.as_ref()) {
            return Some(if *req.method() == Method::GET || *req.method() == Method::HEAD {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::PRECONDITION_FAILED
            });
        }
    } else if let Some(r) = req.headers().typed_get::<headers::IfModifiedSince>() {
        if *req.method() == Method::GET || *req.method() == Method::HEAD {
            if let Some(file_modified) = file_modified {
                if round_time(file_modified) <= round_time(r) {
                    return Some(StatusCode::NOT_MODIFIED);
                }
            }
        }
    }
    None
}

/// Evaluate the WebDAV `If:` header (RFC 4918 10.4). Returns whether it was
/// absent or at least one of its lists was satisfied, plus every
/// state-token that was mentioned (the caller needs these to decide whether
/// a lock it encounters later is "submitted").
pub(crate) async fn dav_if_match(
    req: &Request,
    fs: &Box<dyn DavFileSystem>,
    ls: &Option<Box<dyn DavLockSystem>>,
    path: &DavPath,
) -> (bool, Vec<String>) {
    let ls = ls.as_deref();
    let mut tokens: Vec<String> = Vec::new();

    let r = match req.headers().typed_get::<If>() {
        Some(r) => r,
        None => return (true, tokens),
    };

    let mut any_list_ok = false;

    for iflist in r.0.iter() {
        let toks = iflist.conditions.iter().filter_map(|c| match c.item {
            IfItem::StateToken(ref t) => Some(t.to_owned()),
            _ => None,
        });
        tokens.extend(toks);

        if any_list_ok {
            continue;
        }

        let mut pa: Option<DavPath> = None;
        let (p, valid) = match iflist.resource_tag {
            Some(ref url) => match DavPath::new(url.path()) {
                Ok(p) => {
                    let p: &DavPath = pa.get_or_insert(p);
                    (p, true)
                }
                Err(_) => (path, false),
            },
            None => (path, true),
        };

        let mut list_ok = false;
        for cond in iflist.conditions.iter() {
            let cond_ok = match cond.item {
                IfItem::StateToken(ref s) => {
                    // tokens in the DAV: namespace always evaluate to false (10.4.8).
                    if !valid || s.starts_with("DAV:") {
                        false
                    } else {
                        match ls {
                            Some(ls) => ls.check(p, None, true, false, vec![s.as_str()]).is_ok(),
                            None => false,
                        }
                    }
                }
                IfItem::ETag(ref tag) => {
                    if !valid {
                        false
                    } else {
                        match fs.metadata(p).await {
                            Ok(meta) => match ETag::from_meta(&*meta) {
                                Some(mtag) => tag == &mtag,
                                None => false,
                            },
                            Err(_) => false,
                        }
                    }
                }
            };
            if cond_ok == cond.not {
                list_ok = false;
                break;
            }
            list_ok = true;
        }
        if list_ok {
            any_list_ok = true;
        }
    }
    (any_list_ok, tokens)
}

/// Check both the HTTP conditional headers and the WebDAV `If:` header.
pub(crate) async fn if_match(
    req: &Request,
    meta: Option<&Box<dyn DavMetaData>>,
    fs: &Box<dyn DavFileSystem>,
    ls: &Option<Box<dyn DavLockSystem>>,
    path: &DavPath,
) -> Option<StatusCode> {
    match dav_if_match(req, fs, ls, path).await {
        (true, _) => {}
        (false, _) => return Some(StatusCode::PRECONDITION_FAILED),
    }
    http_if_match(req, meta)
}

/// Like `if_match`, but also returns every state-token the client submitted
/// (via the `If:` header), so the caller can pass them on to the
/// locksystem's `check()`.
pub(crate) async fn if_match_get_tokens(
    req: &Request,
    meta: Option<&Box<dyn DavMetaData>>,
    fs: &Box<dyn DavFileSystem>,
    ls: &Option<Box<dyn DavLockSystem>>,
    path: &DavPath,
) -> Result<Vec<String>, StatusCode> {
    if let Some(code) = http_if_match(req, meta) {
        return Err(code);
    }
    match dav_if_match(req, fs, ls, path).await {
        (true, v) => Ok(v),
        (false, _) => Err(StatusCode::PRECONDITION_FAILED),
    }
}

/// The lock-token-submission rule: a locked resource (or, for a deep
/// operation, anything locked below it) may only be modified if the
/// request submitted every token needed to prove ownership of those locks.
/// Pulled out of the handlers because every state-changing method
/// (PUT, PROPPATCH, DELETE, MKCOL, COPY, MOVE) runs the exact same check
/// right after `if_match_get_tokens`.
pub(crate) fn check_lock_tokens(
    ls: &Option<Box<dyn DavLockSystem>>,
    path: &DavPath,
    principal: Option<&str>,
    tokens: &[String],
    deep: bool,
) -> Result<(), DavError> {
    let ls = ls.as_deref();
    let ls = match ls {
        Some(ls) => ls,
        None => return Ok(()),
    };
    let t = tokens.iter().map(|s| s.as_str()).collect::<Vec<&str>>();
    ls.check(path, principal, false, deep, t)
        .map_err(|locked| DavError::Locked(Box::new(locked), "lock-token-submitted"))
}
