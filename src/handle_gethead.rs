use bytes::Bytes;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Method, Request, Response, StatusCode};
use uuid::Uuid;

use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional;
use crate::davheaders;
use crate::errors::*;
use crate::fs::*;
use crate::util::systemtime_to_offsetdatetime;
use crate::{DavInner, DavResult};

// how many bytes we read from the backing file per chunk sent out on the wire.
const READ_CHUNK: usize = 8192;

impl DavInner {
    pub(crate) async fn handle_get(self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(&req);
        let head = req.method() == &Method::HEAD;

        // directories get a redirect-to-slash or a listing, not file content.
        let meta = self.fs.metadata(&path).await?;
        if meta.is_dir() {
            return self.handle_dirlist(req, head).await;
        }

        let mut file = self.fs.open(&path, OpenOptions::read()).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let mut start = 0;
        let mut count = meta.len();
        let len = count;
        let mut do_range = true;

        let file_etag = davheaders::ETag::from_meta(&*meta);

        if let Some(r) = req.headers().typed_get::<davheaders::IfRange>() {
            do_range = conditional::ifrange_match(&r, file_etag.as_ref(), meta.modified().ok());
        }

        // see if we want to get a range. `ranges` stays empty unless the
        // request asked for one and it survived merging.
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        if do_range {
            do_range = false;
            if let Some(r) = req.headers().typed_get::<headers::Range>() {
                let satisfiable = r
                    .satisfiable_ranges(len)
                    .map(|(b, e)| (bound_start(b, len), bound_end(e, len)))
                    .collect::<Vec<_>>();
                if satisfiable.is_empty() {
                    let mut res = Response::new(Body::empty());
                    res.headers_mut().typed_insert(headers::ContentRange::unsatisfied_bytes(len));
                    *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                    return Ok(res);
                }
                ranges = merge_ranges(satisfiable);
                start = ranges[0].0;
                count = ranges[0].1 - ranges[0].0 + 1;
                do_range = true;
            }
        }

        let mut res = Response::new(Body::empty());

        // set Last-Modified and ETag headers.
        if let Ok(modified) = meta.modified() {
            res.headers_mut()
                .typed_insert(headers::LastModified::from(modified));
        }
        if let Some(ref etag) = file_etag {
            res.headers_mut().typed_insert(etag.clone());
        }

        // handle the if-headers.
        if let Some(s) = conditional::if_match(&req, Some(&meta), &self.fs, &self.ls, &path).await {
            return Err(DavError::Status(s));
        }

        let mime = path.get_mime_type_str().to_owned();

        if do_range && ranges.len() > 1 {
            // multiple disjoint ranges: RFC 7233 4.1, multipart/byteranges.
            let boundary = Uuid::new_v4().to_string();
            let parts: Vec<String> = ranges
                .iter()
                .map(|&(s, e)| {
                    format!(
                        "--{}\r\nContent-Type: {}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
                        boundary, mime, s, e, len
                    )
                })
                .collect();
            let closing = format!("--{}--\r\n", boundary);
            let body_len: u64 = parts
                .iter()
                .zip(ranges.iter())
                .map(|(hdr, &(s, e))| hdr.len() as u64 + (e - s + 1) + 2)
                .sum::<u64>()
                + closing.len() as u64;

            res.headers_mut().insert(
                http::header::CONTENT_TYPE,
                format!("multipart/byteranges; boundary={}", boundary).parse().unwrap(),
            );
            res.headers_mut().typed_insert(headers::ContentLength(body_len));
            res.headers_mut().typed_insert(headers::AcceptRanges::bytes());
            *res.status_mut() = StatusCode::PARTIAL_CONTENT;

            if head {
                return Ok(res);
            }

            *res.body_mut() = Body::from(AsyncStream::new(|mut tx| {
                async move {
                    for (hdr, &(s, e)) in parts.iter().zip(ranges.iter()) {
                        tx.send(Bytes::from(hdr.clone())).await;
                        file.seek(std::io::SeekFrom::Start(s)).await?;
                        let mut remaining = e - s + 1;
                        while remaining > 0 {
                            let want = std::cmp::min(remaining, READ_CHUNK as u64) as usize;
                            let data = file.read_bytes(want).await?;
                            if data.is_empty() {
                                break;
                            }
                            remaining -= data.len() as u64;
                            tx.send(data).await;
                        }
                        tx.send(Bytes::from_static(b"\r\n")).await;
                    }
                    tx.send(Bytes::from(closing)).await;
                    Ok(())
                }
            }));

            return Ok(res);
        }

        if do_range {
            // seek to beginning of requested data.
            if let Err(_) = file.seek(std::io::SeekFrom::Start(start)).await {
                *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                return Ok(res);
            }
            res.headers_mut().typed_insert(
                headers::ContentRange::bytes(start..(start + count), len).unwrap(),
            );
            *res.status_mut() = StatusCode::PARTIAL_CONTENT;
        } else {
            *res.status_mut() = StatusCode::OK;
        }

        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            mime.parse().unwrap(),
        );
        res.headers_mut().typed_insert(headers::ContentLength(count));
        res.headers_mut().typed_insert(headers::AcceptRanges::bytes());

        if head {
            return Ok(res);
        }

        *res.body_mut() = Body::from(AsyncStream::new(|mut tx| {
            async move {
                let mut remaining = count;
                while remaining > 0 {
                    let want = std::cmp::min(remaining, READ_CHUNK as u64) as usize;
                    let data = file.read_bytes(want).await?;
                    if data.is_empty() {
                        // file got truncated underneath us: pad with zeroes
                        // rather than send a short response body.
                        let n = std::cmp::min(remaining, 4096) as usize;
                        tx.send(Bytes::from(vec![0u8; n])).await;
                        remaining -= n as u64;
                        continue;
                    }
                    remaining -= data.len() as u64;
                    tx.send(data).await;
                }
                Ok(())
            }
        }));

        Ok(res)
    }

    pub(crate) async fn handle_dirlist(self, req: &Request<()>, head: bool) -> DavResult<Response<Body>> {
        let mut path = self.path(&req);
        let mut res = Response::new(Body::empty());

        // This is a directory. If the path doesn't end in "/", send a redirect.
        // Most webdav clients handle redirects really badly, but a client asking
        // for a directory index is usually a browser.
        if !path.is_collection() {
            path.add_slash();
            let newloc = path.with_prefix().as_url_string();
            res.headers_mut().insert(http::header::LOCATION, newloc.parse().unwrap());
            res.headers_mut().typed_insert(headers::ContentLength(0));
            *res.status_mut() = StatusCode::FOUND;
            return Ok(res);
        }

        if !self.autoindex.unwrap_or(false) {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }

        // read directory or bail.
        let mut entries = self.fs.read_dir(&path).await?;

        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            "text/html; charset=utf-8".parse().unwrap(),
        );
        *res.status_mut() = StatusCode::OK;
        if head {
            return Ok(res);
        }

        *res.body_mut() = Body::from(AsyncStream::new(|mut tx| {
            async move {
                struct Dirent {
                    path: String,
                    name: String,
                    meta: Box<dyn DavMetaData>,
                }

                let mut dirents: Vec<Dirent> = Vec::new();
                while let Some(dirent) = entries.next().await {
                    let dirent = dirent?;
                    let mut name = dirent.name();
                    if name.starts_with(b".") {
                        continue;
                    }
                    let mut npath = path.clone();
                    npath.push_segment(&name);
                    if let Ok(meta) = dirent.metadata().await {
                        if meta.is_dir() {
                            name.push(b'/');
                            npath.add_slash();
                        }
                        dirents.push(Dirent {
                            path: npath.with_prefix().as_url_string(),
                            name: String::from_utf8_lossy(&name).to_string(),
                            meta,
                        });
                    }
                }

                dirents.sort_by(|a, b| {
                    let adir = a.meta.is_dir();
                    let bdir = b.meta.is_dir();
                    if adir && !bdir {
                        std::cmp::Ordering::Less
                    } else if bdir && !adir {
                        std::cmp::Ordering::Greater
                    } else {
                        a.name.cmp(&b.name)
                    }
                });

                let upath = htmlescape::encode_minimal(&path.as_url_string());
                let mut w = String::new();
                w.push_str("<html><head>");
                w.push_str(&format!("<title>Index of {}</title>", upath));
                w.push_str("<style>");
                w.push_str("table {");
                w.push_str("  border-collapse: separate;");
                w.push_str("  border-spacing: 1.5em 0.25em;");
                w.push_str("}");
                w.push_str("h1 {");
                w.push_str("  padding-left: 0.3em;");
                w.push_str("}");
                w.push_str(".mono {");
                w.push_str("  font-family: monospace;");
                w.push_str("}");
                w.push_str("</style>");
                w.push_str("</head>");

                w.push_str("<body>");
                w.push_str(&format!("<h1>Index of {}</h1>", upath));
                w.push_str("<table>");
                w.push_str("<tr>");
                w.push_str("<th>Name</th><th>Last modified</th><th>Size</th>");
                w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
                w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td>&nbsp;</td><td class=\"mono\" align=\"right\">[DIR]</td></tr>");
                tx.send(Bytes::from(w)).await;

                for dirent in &dirents {
                    let modified = match dirent.meta.modified() {
                        Ok(t) => {
                            let tm = systemtime_to_offsetdatetime(t);
                            format!(
                                "{:04}-{:02}-{:02} {:02}:{:02}",
                                tm.year(),
                                tm.month() as u8,
                                tm.day(),
                                tm.hour(),
                                tm.minute()
                            )
                        },
                        Err(_) => "".to_string(),
                    };
                    let size = match dirent.meta.is_file() {
                        true => dirent.meta.len().to_string(),
                        false => "[DIR]".to_string(),
                    };
                    let name = htmlescape::encode_minimal(&dirent.name);
                    let s = format!(
                        "<tr><td><a href=\"{}\">{}</a></td><td class=\"mono\">{}</td><td class=\"mono\" align=\"right\">{}</td></tr>",
                        dirent.path, name, modified, size
                    );
                    tx.send(Bytes::from(s)).await;
                }

                let mut w = String::new();
                w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
                w.push_str("</table></body></html>");
                tx.send(Bytes::from(w)).await;

                Ok(())
            }
        }));

        Ok(res)
    }
}

fn bound_start(b: std::ops::Bound<u64>, len: u64) -> u64 {
    use std::ops::Bound;
    match b {
        Bound::Included(n) => n,
        Bound::Excluded(n) => n + 1,
        Bound::Unbounded => 0,
    }
    .min(len)
}

fn bound_end(b: std::ops::Bound<u64>, len: u64) -> u64 {
    use std::ops::Bound;
    match b {
        Bound::Included(n) => n,
        Bound::Excluded(n) => n.saturating_sub(1),
        Bound::Unbounded => len.saturating_sub(1),
    }
    .min(len.saturating_sub(1))
}

/// Sorts by start offset and fuses overlapping or abutting ranges into one,
/// so a request like `bytes=0-99,100-199,500-599` turns into
/// `[(0, 199), (500, 599)]` instead of being served byte-for-byte.
fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_by_key(|r| r.0);
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => {
                if end > last.1 {
                    last.1 = end;
                }
            },
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_passes_through_disjoint_ranges() {
        let r = merge_ranges(vec![(0, 99), (200, 299)]);
        assert_eq!(r, vec![(0, 99), (200, 299)]);
    }

    #[test]
    fn merge_fuses_overlapping_ranges() {
        let r = merge_ranges(vec![(0, 99), (50, 149)]);
        assert_eq!(r, vec![(0, 149)]);
    }

    #[test]
    fn merge_fuses_abutting_ranges() {
        let r = merge_ranges(vec![(0, 99), (100, 199)]);
        assert_eq!(r, vec![(0, 199)]);
    }

    #[test]
    fn merge_sorts_before_fusing() {
        let r = merge_ranges(vec![(200, 299), (0, 99)]);
        assert_eq!(r, vec![(0, 99), (200, 299)]);
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merge_ranges(vec![(0, 99), (50, 149), (400, 499), (500, 600)]);
        let twice = merge_ranges(once.clone());
        assert_eq!(once, twice);
    }
}
