use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt};
use serde::de::DeserializeOwned;
use url::Url;

use crate::codec::{Decoder, Json};
use crate::error::BoxError;

/// The status line and headers of a reply, without its body.
///
/// This is what filters see of the raw reply; it is cheap to clone.
#[derive(Clone)]
pub struct ReplyHead {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
}

impl ReplyHead {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, url: Url) -> ReplyHead {
        ReplyHead {
            status,
            headers,
            url,
        }
    }

    /// Get the `StatusCode` of this reply.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the `Headers` of this reply.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the `Url` the call was sent to.
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Debug for ReplyHead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReplyHead")
            .field("url", &self.url.as_str())
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

/// A raw reply, as produced by a [`Transport`](crate::Transport).
///
/// The body is not read until asked for. Holding a `Reply` keeps its
/// connection busy; dropping it, or reading the body to the end, releases
/// the connection.
pub struct Reply {
    head: ReplyHead,
    body: UnsyncBoxBody<Bytes, BoxError>,
}

impl Reply {
    /// Creates a reply from its parts.
    ///
    /// Custom transports use this to hand back what they received.
    pub fn new<B>(status: StatusCode, headers: HeaderMap, url: Url, body: B) -> Reply
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Reply {
            head: ReplyHead::new(status, headers, url),
            body: body.map_err(Into::<BoxError>::into).boxed_unsync(),
        }
    }

    /// Get the `StatusCode` of this reply.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Get the `Headers` of this reply.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Get the `Url` the call was sent to.
    #[inline]
    pub fn url(&self) -> &Url {
        &self.head.url
    }

    /// Get the status, headers and URL without the body.
    #[inline]
    pub fn head(&self) -> &ReplyHead {
        &self.head
    }

    /// Get the content length of the reply, if it is known.
    pub fn content_length(&self) -> Option<u64> {
        self.body.size_hint().exact()
    }

    /// Get the full reply body as `Bytes`.
    pub async fn bytes(self) -> crate::Result<Bytes> {
        let url = self.head.url;
        self.body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| crate::error::transport(e).with_url(url))
    }

    /// Get the full reply text, decoded as UTF-8 with lossy replacement.
    pub async fn text(self) -> crate::Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Try to deserialize the reply body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> crate::Result<T> {
        let url = self.head.url.clone();
        let bytes = self.bytes().await?;
        Json.decode(&bytes)
            .map_err(|e| crate::error::decode(e).with_url(url))
    }

    /// Stream a chunk of the reply body.
    ///
    /// When the body has been exhausted, this returns `Ok(None)`.
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        while let Some(frame) = self.body.frame().await {
            let frame =
                frame.map_err(|e| crate::error::transport(e).with_url(self.head.url.clone()))?;
            if let Ok(data) = frame.into_data() {
                return Ok(Some(data));
            }
            // skip trailers
        }
        Ok(None)
    }

    /// Turn a reply into an error if the server returned an error status.
    ///
    /// The body is dropped; use the call error returned by the client's
    /// reply methods to inspect an error body.
    pub fn error_for_status(self) -> crate::Result<Self> {
        let status = self.status();
        if status.is_client_error() || status.is_server_error() {
            Err(crate::error::status_code(
                self.head.url,
                status,
                None,
                Bytes::new(),
            ))
        } else {
            Ok(self)
        }
    }

    pub(crate) fn into_parts(self) -> (ReplyHead, UnsyncBoxBody<Bytes, BoxError>) {
        (self.head, self.body)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reply")
            .field("url", &self.head.url.as_str())
            .field("status", &self.head.status)
            .field("headers", &self.head.headers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn url() -> Url {
        Url::parse("http://localhost/json/reply/GetCustomer").unwrap()
    }

    #[tokio::test]
    async fn reply_text_and_length() {
        let reply = Reply::new(
            StatusCode::OK,
            HeaderMap::new(),
            url(),
            Full::new(Bytes::from_static(b"Hello")),
        );
        assert_eq!(reply.content_length(), Some(5));
        assert_eq!(reply.text().await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn reply_chunks_then_none() {
        let mut reply = Reply::new(
            StatusCode::OK,
            HeaderMap::new(),
            url(),
            Full::new(Bytes::from_static(b"abc")),
        );
        assert_eq!(reply.chunk().await.unwrap(), Some(Bytes::from_static(b"abc")));
        assert_eq!(reply.chunk().await.unwrap(), None);
    }

    #[test]
    fn error_for_status() {
        let reply = Reply::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            url(),
            Full::new(Bytes::new()),
        );
        let err = reply.error_for_status().unwrap_err();
        assert!(err.is_status());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.url(), Some(&url()));
    }
}
