use std::cmp;
use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::client::KeepCoreThreadAlive;
use super::wait;
use crate::reply::ReplyHead;

/// A raw reply of a blocking call.
///
/// The body can be read all at once with [`text`](Reply::text),
/// [`bytes`](Reply::bytes) or [`json`](Reply::json), or streamed through
/// the `std::io::Read` implementation.
pub struct Reply {
    inner: crate::Reply,
    timeout: Option<Duration>,
    chunk: Bytes,
    _thread_handle: KeepCoreThreadAlive,
}

impl Reply {
    pub(crate) fn new(
        inner: crate::Reply,
        timeout: Option<Duration>,
        thread: KeepCoreThreadAlive,
    ) -> Reply {
        Reply {
            inner,
            timeout,
            chunk: Bytes::new(),
            _thread_handle: thread,
        }
    }

    /// Get the `StatusCode` of this reply.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Get the `Headers` of this reply.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Get the `Url` the call was sent to.
    #[inline]
    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    /// Get the status, headers and URL without the body.
    #[inline]
    pub fn head(&self) -> &ReplyHead {
        self.inner.head()
    }

    /// Get the content length of the reply, if it is known.
    pub fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }

    /// Get the full reply body as `Bytes`.
    pub fn bytes(self) -> crate::Result<Bytes> {
        let url = self.inner.url().clone();
        let timeout = self.timeout;
        wait::timeout(self.inner.bytes(), timeout).map_err(|e| waited(e, url))
    }

    /// Get the full reply text, decoded as UTF-8 with lossy replacement.
    pub fn text(self) -> crate::Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Try to deserialize the reply body as JSON.
    pub fn json<T: DeserializeOwned>(self) -> crate::Result<T> {
        let url = self.inner.url().clone();
        let timeout = self.timeout;
        wait::timeout(self.inner.json(), timeout).map_err(|e| waited(e, url))
    }

    /// Turn a reply into an error if the server returned an error status.
    pub fn error_for_status(self) -> crate::Result<Self> {
        let Reply {
            inner,
            timeout,
            chunk,
            _thread_handle,
        } = self;
        inner.error_for_status().map(|inner| Reply {
            inner,
            timeout,
            chunk,
            _thread_handle,
        })
    }
}

impl Read for Reply {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.chunk.is_empty() {
            let url = self.inner.url().clone();
            let timeout = self.timeout;
            match wait::timeout(self.inner.chunk(), timeout) {
                Ok(Some(chunk)) => self.chunk = chunk,
                Ok(None) => return Ok(0),
                Err(e) => return Err(io::Error::new(io::ErrorKind::Other, waited(e, url))),
            }
        }

        let len = cmp::min(buf.len(), self.chunk.len());
        buf[..len].copy_from_slice(&self.chunk.split_to(len));
        Ok(len)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

fn waited(e: wait::Waited<crate::Error>, url: Url) -> crate::Error {
    match e {
        wait::Waited::TimedOut(e) => crate::error::transport(e).with_url(url),
        wait::Waited::Executor(e) => crate::error::transport(e).with_url(url),
        wait::Waited::Inner(e) => e,
    }
}
