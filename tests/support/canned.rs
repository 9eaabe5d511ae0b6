//! Transports that never touch the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::Full;
use service_client::{Outgoing, Pending, Reply, StatusCode, Transport};

pub type Log = Arc<Mutex<Vec<&'static str>>>;

/// Answers every call with a fixed customer, noting each send.
pub struct Canned {
    log: Log,
    sent: Arc<AtomicUsize>,
}

impl Transport for Canned {
    fn send(&self, request: Outgoing) -> Pending {
        self.log.lock().unwrap().push("transport");
        self.sent.fetch_add(1, Ordering::SeqCst);
        let url = request.url().clone();
        Box::pin(async move {
            let body = Full::new(Bytes::from_static(
                br#"{"customer":{"id":1},"created":1}"#,
            ));
            Ok(Reply::new(StatusCode::OK, HeaderMap::new(), url, body))
        })
    }
}

pub fn canned() -> (Canned, Log, Arc<AtomicUsize>) {
    let log = Log::default();
    let sent = Arc::new(AtomicUsize::new(0));
    let transport = Canned {
        log: log.clone(),
        sent: sent.clone(),
    };
    (transport, log, sent)
}

pub fn logged(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

/// Accepts every call and never answers.
pub struct Stalled {
    pub sent: Arc<AtomicUsize>,
}

impl Transport for Stalled {
    fn send(&self, _request: Outgoing) -> Pending {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::pending())
    }
}
