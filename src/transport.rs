//! The seam between a client and the network.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;

use crate::body::Body;
use crate::reply::Reply;
use crate::request::Outgoing;

/// A future resolving to the raw reply of one call.
pub type Pending = Pin<Box<dyn Future<Output = crate::Result<Reply>> + Send>>;

/// Sends built calls and hands back their raw replies.
///
/// A transport must not interpret the status code: every reply the
/// server sends, including error statuses, resolves to `Ok`. Errors are
/// reserved for failing to talk to the server at all.
///
/// Both the blocking and the non-blocking client drive the same future,
/// so a transport only has to be written once.
pub trait Transport: Send + Sync + 'static {
    /// Send the call.
    fn send(&self, request: Outgoing) -> Pending;
}

/// The default transport: HTTP/1 over plain TCP, with pooled connections.
#[derive(Clone)]
pub struct HttpTransport {
    hyper: HyperClient<HttpConnector, Body>,
}

impl HttpTransport {
    /// Creates a transport without a connect timeout.
    pub fn new() -> HttpTransport {
        HttpTransport::with_connect_timeout(None)
    }

    /// Creates a transport that gives up connecting after `timeout`.
    pub fn with_connect_timeout(timeout: Option<Duration>) -> HttpTransport {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(timeout);
        connector.set_nodelay(true);

        let hyper = HyperClient::builder(TokioExecutor::new()).build(connector);
        HttpTransport { hyper }
    }
}

impl Default for HttpTransport {
    fn default() -> HttpTransport {
        HttpTransport::new()
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Outgoing) -> Pending {
        let url = request.url().clone();
        let req = match request.into_http() {
            Ok(req) => req,
            Err(err) => return Box::pin(futures_util::future::ready(Err(err))),
        };

        log::trace!("sending {} {}", req.method(), url);
        let in_flight = self.hyper.request(req);
        Box::pin(async move {
            let res = in_flight
                .await
                .map_err(|e| crate::error::transport(e).with_url(url.clone()))?;
            let (parts, body) = res.into_parts();
            Ok(Reply::new(parts.status, parts.headers, url, body))
        })
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HttpTransport").finish()
    }
}
