//! Multi-Status (207) response accumulation (RFC 4918 11.1).
//!
//! Handlers that can fail separately for several resources under a
//! collection (DELETE, MOVE, COPY of a tree) collect one status per path
//! here, then render either a bare status (if only the request path itself
//! failed) or a full `DAV:multistatus` document.
use http::{Response, StatusCode};
use xml::common::XmlVersion;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as XmlWEvent;
use xml::EmitterConfig;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::MemBuffer;

pub(crate) struct MultiError {
    req_path: DavPath,
    items: Vec<(DavPath, StatusCode)>,
}

impl MultiError {
    pub fn new(req_path: DavPath) -> MultiError {
        MultiError {
            req_path,
            items: Vec::new(),
        }
    }

    pub fn add_status(&mut self, path: &DavPath, status: impl Into<DavError>) {
        self.items.push((path.clone(), status.into().statuscode()));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Render the collected statuses. If only the request path itself was
    /// recorded, a bare status response is enough; otherwise a full
    /// `DAV:multistatus` body is built.
    pub fn response(self) -> Result<Response<Body>, DavError> {
        if self.items.is_empty() {
            return Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Body::empty())
                .unwrap());
        }

        if self.items.len() == 1 && self.items[0].0 == self.req_path {
            let (_, status) = self.items[0];
            return Ok(Response::builder().status(status).body(Body::empty()).unwrap());
        }

        let mut emitter = EventWriter::new_with_config(
            MemBuffer::new(),
            EmitterConfig {
                perform_indent: true,
                ..EmitterConfig::default()
            },
        );
        emitter.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        emitter.write(XmlWEvent::start_element("D:multistatus").ns("D", "DAV:"))?;
        for (path, status) in &self.items {
            write_response(&mut emitter, path, *status)?;
        }
        emitter.write(XmlWEvent::end_element())?;

        let body = emitter.inner_mut().take();
        let resp = Response::builder()
            .header("content-type", "application/xml; charset=utf-8")
            .status(StatusCode::MULTI_STATUS)
            .body(Body::from(body))
            .unwrap();
        Ok(resp)
    }
}

fn write_elem(xw: &mut EventWriter<MemBuffer>, name: &str, text: &str) -> Result<(), DavError> {
    xw.write(XmlWEvent::start_element(name))?;
    if !text.is_empty() {
        xw.write(XmlWEvent::characters(text))?;
    }
    xw.write(XmlWEvent::end_element())?;
    Ok(())
}

fn write_response(xw: &mut EventWriter<MemBuffer>, path: &DavPath, status: StatusCode) -> Result<(), DavError> {
    xw.write(XmlWEvent::start_element("D:response"))?;
    write_elem(xw, "D:href", &path.with_prefix().as_url_string())?;
    write_elem(xw, "D:status", &format!("HTTP/1.1 {}", status))?;
    xw.write(XmlWEvent::end_element())?;
    Ok(())
}
