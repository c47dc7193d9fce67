use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, SizeHint};

use crate::Transaction;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The body type flowing through the proxy, in both directions.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| -> BoxError { match never {} })
        .boxed()
}

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| -> BoxError { match never {} })
        .boxed()
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Client to backend; counts into `bytes_in`.
    Inbound,
    /// Backend to client; counts into `bytes_out`.
    Outbound,
}

/// A body adapter that counts the bytes flowing through a transaction, and
/// optionally closes the transaction when the stream ends or is dropped.
pub struct MeteredBody<B> {
    inner: B,
    transaction: Arc<Transaction>,
    direction: Direction,
    close_on_end: bool,
    closed: bool,
}

impl<B> MeteredBody<B> {
    /// Meter a request body on its way to the backend.
    pub fn inbound(inner: B, transaction: Arc<Transaction>) -> Self {
        MeteredBody {
            inner,
            transaction,
            direction: Direction::Inbound,
            close_on_end: false,
            closed: false,
        }
    }

    /// Meter a response body on its way to the client. The transaction is
    /// closed when the body finishes, fails, or is dropped.
    pub fn outbound(inner: B, transaction: Arc<Transaction>) -> Self {
        MeteredBody {
            inner,
            transaction,
            direction: Direction::Outbound,
            close_on_end: true,
            closed: false,
        }
    }

    fn count(&self, bytes: u64) {
        match self.direction {
            Direction::Inbound => self.transaction.add_bytes_in(bytes),
            Direction::Outbound => self.transaction.add_bytes_out(bytes),
        }
    }

    fn finish(&mut self) {
        if self.close_on_end && !self.closed {
            self.closed = true;
            self.transaction.close();
        }
    }
}

impl<B> Body for MeteredBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.count(data.len() as u64);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(error))) => {
                let error = error.into();
                this.transaction.set_stream_error(error.to_string());
                this.finish();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for MeteredBody<B> {
    fn drop(&mut self) {
        // A dropped response body (client gone, connection error) still ends
        // the transaction.
        self.finish();
    }
}
