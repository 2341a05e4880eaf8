//! The one error type that crosses module boundaries in this crate.
use std::error::Error;
use std::io::ErrorKind;

use http::StatusCode;

use crate::fs::FsError;
use crate::ls::DavLock;

#[derive(Debug)]
pub enum DavError {
    XmlReadError,
    XmlParseError,
    InvalidPath,
    IllegalPath,
    ForbiddenPath,
    UnknownDavMethod,
    /// the request needed a body (PUT, PROPPATCH, LOCK) and none was present.
    EmptyBody,
    /// sending a chunk into the response channel failed (receiver gone).
    ChanSendError,
    Status(StatusCode),
    /// like `Status`, but also forces the connection to be closed.
    StatusClose(StatusCode),
    /// `423 Locked`, naming the conflicting lock as a WebDAV precondition
    /// element (RFC 4918 9.10.2): `"no-conflicting-lock"` when a new lock
    /// request collided with it, `"lock-token-submitted"` when a
    /// state-changing request didn't submit the token that covers it.
    Locked(Box<DavLock>, &'static str),
    FsError(FsError),
    IoError(std::io::Error),
    XmlReaderError(xml::reader::Error),
    XmlWriterError(xml::writer::Error),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::IoError(ref e) => Some(e),
            DavError::XmlReaderError(ref e) => Some(e),
            DavError::XmlWriterError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::FsError(e) => write!(f, "filesystem error: {}", e),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<std::io::Error> for DavError {
    fn from(e: std::io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<xml::reader::Error> for DavError {
    fn from(e: xml::reader::Error) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

fn ioerror_to_status(ioerror: &std::io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Maps a filesystem-layer error onto the HTTP status it implies.
pub(crate) fn fserror_to_status(e: FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::LoopDetected => StatusCode::LOOP_DETECTED,
        FsError::PathTooLong => StatusCode::URI_TOO_LONG,
        FsError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        FsError::IsRemote => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::EmptyBody => StatusCode::BAD_REQUEST,
            DavError::ChanSendError => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::IoError(ref e) => ioerror_to_status(e),
            DavError::FsError(e) => fserror_to_status(*e),
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::Locked(..) => StatusCode::LOCKED,
            DavError::XmlReaderError(_) => StatusCode::BAD_REQUEST,
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the connection must be closed after writing this error's response.
    pub(crate) fn must_close(&self) -> bool {
        matches!(self, DavError::StatusClose(_))
    }
}

impl From<DavError> for std::io::Error {
    fn from(e: DavError) -> std::io::Error {
        match e {
            DavError::IoError(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}
