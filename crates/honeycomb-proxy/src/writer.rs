use std::sync::Arc;

use http::{HeaderValue, Response, StatusCode};
use hyper::body::Body;
use hyper::upgrade::OnUpgrade;

use crate::{
    full_body, BoxError, MeteredBody, ProxyBody, ProxyError, StatusPage, Transaction,
    TransactionState,
};

/// Drives a transaction's state machine as the response is produced.
///
/// The writer owns the client's upgrade handle. Sending a response marks the
/// headers as written and records the time to first byte; response bodies
/// are metered so the transaction closes when the last byte leaves (or the
/// client goes away). After the transaction closes the writer refuses
/// further work.
pub struct ResponseWriter {
    transaction: Arc<Transaction>,
    upgrade: Option<OnUpgrade>,
}

impl ResponseWriter {
    pub fn new(transaction: Arc<Transaction>, upgrade: Option<OnUpgrade>) -> Self {
        ResponseWriter {
            transaction,
            upgrade,
        }
    }

    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    /// Wrap an upstream body so its bytes are counted and the transaction is
    /// closed when it ends.
    pub fn metered<B>(&self, body: B) -> ProxyBody
    where
        B: Body<Data = bytes::Bytes> + Unpin + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        use http_body_util::BodyExt;
        MeteredBody::outbound(body, self.transaction.clone()).boxed()
    }

    /// Send a response, driving the `Received → Responded` transition.
    ///
    /// Once the transaction is closed the response is discarded and an empty
    /// reply is produced instead; nothing may be written after close.
    pub fn send(&mut self, response: Response<ProxyBody>) -> Response<ProxyBody> {
        if self.transaction.state() == TransactionState::Closed {
            return Response::new(crate::empty_body());
        }

        self.transaction.respond(response.status());
        response
    }

    /// Render a status page for an error or a bare status code.
    pub fn send_status_page(
        &mut self,
        status: StatusCode,
        accept: Option<&str>,
    ) -> Response<ProxyBody> {
        let page = StatusPage::render(status, accept);

        let mut response = Response::new(self.metered(full_body(page.body)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(page.content_type),
        );

        self.send(response)
    }

    /// Take over the client connection for a protocol upgrade.
    ///
    /// Transitions the transaction to `Responded`, logs it immediately, and
    /// yields the pending upgrade. Fails when the transaction is already
    /// closed or the client connection does not support upgrades (HTTP/2,
    /// for instance).
    pub fn hijack(&mut self) -> Result<OnUpgrade, ProxyError> {
        if self.transaction.state() == TransactionState::Closed {
            return Err(ProxyError::WriterClosed);
        }

        let upgrade = self.upgrade.take().ok_or(ProxyError::HijackUnsupported)?;
        self.transaction.hijacked();

        Ok(upgrade)
    }
}
