//! Definitions for the Request and Response bodies.

use std::error::Error as StdError;
use std::io;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::Stream;
use http_body::{Body as HttpBody, Frame};

use crate::async_stream::AsyncStream;

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body`.
pub struct Body {
    pub(crate) inner: BodyType,
}

pub(crate) enum BodyType {
    Bytes(Option<Bytes>),
    AsyncStream(AsyncStream<Bytes, io::Error>),
    Empty,
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body {
            inner: BodyType::Empty,
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match self.inner {
            BodyType::Bytes(ref mut strm) => Poll::Ready(strm.take().map(Ok)),
            BodyType::AsyncStream(ref mut strm) => {
                let strm = Pin::new(strm);
                strm.poll_next(cx)
            },
            BodyType::Empty => Poll::Ready(None),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        self.poll_next(cx).map(|opt| opt.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, BodyType::Empty)
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t))),
        }
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t.to_string()))),
        }
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body {
            inner: BodyType::Bytes(Some(t)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(t: Vec<u8>) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t))),
        }
    }
}

impl From<AsyncStream<Bytes, io::Error>> for Body {
    fn from(s: AsyncStream<Bytes, io::Error>) -> Body {
        Body {
            inner: BodyType::AsyncStream(s),
        }
    }
}

/// Adapts an incoming `http_body::Body` (the request body the HTTP server
/// hands us) into the plain `Stream<Item = Result<Bytes, ReqError>>` that
/// `DavInner::read_request` and the PUT/PATCH handlers want to poll.
///
/// `http_body::Body::poll_frame` yields `Frame`s that may carry either data
/// or trailers; non-data frames are simply skipped.
pub(crate) struct InBody<ReqBody> {
    body: Pin<Box<ReqBody>>,
}

impl<ReqBody> InBody<ReqBody>
where
    ReqBody: HttpBody,
{
    pub fn from(body: ReqBody) -> InBody<ReqBody> {
        InBody { body: Box::pin(body) }
    }
}

impl<ReqBody, ReqData, ReqError> Stream for InBody<ReqBody>
where
    ReqData: Buf + Send,
    ReqError: StdError + Send + Sync + 'static,
    ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
{
    type Item = Result<Bytes, ReqError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match self.body.as_mut().poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => frame,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            match frame.into_data() {
                Ok(mut data) => {
                    let bytes = data.copy_to_bytes(data.remaining());
                    return Poll::Ready(Some(Ok(bytes)));
                },
                // trailers frame: keep polling for the next one.
                Err(_) => continue,
            }
        }
    }
}

/// The inverse of `InBody`: wraps a `Stream<Item = Result<ReqData, ReqError>>`
/// so it can be handed to something that expects an `http_body::Body`
/// (used by the `axum`/`hyper` demos to re-export our `Body` as-is).
pub(crate) struct StreamBody<B, D, E> {
    body: B,
    _marker: PhantomData<fn() -> (D, E)>,
}

impl<B, D, E> StreamBody<B, D, E>
where
    D: Buf + Send,
    E: StdError + Send + Sync + 'static,
    B: Stream<Item = Result<D, E>> + Unpin,
{
    #[allow(dead_code)]
    pub fn new(body: B) -> StreamBody<B, D, E> {
        StreamBody { body, _marker: PhantomData }
    }
}

impl<B, D, E> HttpBody for StreamBody<B, D, E>
where
    D: Buf + Send,
    E: StdError + Send + Sync + 'static,
    B: Stream<Item = Result<D, E>> + Unpin,
{
    type Data = D;
    type Error = E;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<D>, E>>> {
        Pin::new(&mut self.body)
            .poll_next(cx)
            .map(|opt| opt.map(|res| res.map(Frame::data)))
    }
}

