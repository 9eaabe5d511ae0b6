//! The stages every call goes through, shared by both clients.
//!
//! `build` and `prepare` run before the transport, `finish` after it, all
//! on the caller's thread. Only `exchange`, which drives the transport,
//! is a future; the blocking client ships it to its runtime thread while
//! the async client awaits it in place.

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use http_body_util::BodyExt;
use log::{debug, trace};
use serde::de::value::UnitDeserializer;
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Deserialize;
use url::Url;

use crate::body::Body;
use crate::codec::{Codec, Decoder};
use crate::config::{RequestConfig, TotalTimeout};
use crate::error::{BoxError, ErrorResponse, FilterStage};
use crate::filter::{Call, Entry, Filters};
use crate::reply::{Reply, ReplyHead};
use crate::request::{self, Operation, Outgoing, ReturnType};
use crate::transport::Transport;

/// Everything a client needs to run a call.
#[derive(Clone)]
pub(crate) struct Pipeline<C> {
    pub(crate) codec: C,
    pub(crate) base: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: RequestConfig<TotalTimeout>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) filters: Filters,
}

impl<C: Codec> Pipeline<C> {
    pub(crate) fn build_typed<R: Operation>(
        &self,
        method: Method,
        request: &R,
    ) -> crate::Result<Outgoing> {
        let (url, body) = request::typed(&self.codec, &self.base, &method, request)?;
        trace!("built {} {} for {}", method, url, R::NAME);
        Ok(self.outgoing(method, url, body))
    }

    pub(crate) fn build_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
    ) -> crate::Result<Outgoing> {
        let url = request::raw(&self.base, path)?;
        trace!("built raw {} {}", method, url);
        Ok(self.outgoing(method, url, body))
    }

    fn outgoing(&self, method: Method, url: Url, body: Option<Body>) -> Outgoing {
        let mut headers = self.headers.clone();
        if body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(C::CONTENT_TYPE));
        }
        Outgoing::new(method, url, headers, body)
    }

    /// Runs the request filter, then asks the results filter for a cached
    /// value. `Some` means the call is answered and must not be sent.
    pub(crate) fn prepare<T: ReturnType>(
        &self,
        out: &mut Outgoing,
        call: &Call<'_>,
    ) -> crate::Result<Option<T>> {
        self.filters.on_request(out)?;
        match self.filters.lookup(call)? {
            Some(entry) => {
                trace!("{} answered by results filter", call.cache_key());
                cached(&entry, call).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Like `prepare`, for calls returning the raw reply, which a results
    /// filter cannot answer.
    pub(crate) fn prepare_reply(&self, out: &mut Outgoing, call: &Call<'_>) -> crate::Result<()> {
        self.filters.on_request(out)?;
        match self.filters.lookup(call)? {
            Some(_) => Err(crate::error::filter(FilterStage::Results, NotCacheable)
                .with_url(call.url().clone())),
            None => Ok(()),
        }
    }

    /// The timeout for a call: its own override, else the client's.
    pub(crate) fn timeout_for(&self, out: &Outgoing) -> Option<Duration> {
        self.timeout.fetch(out.extensions()).copied()
    }

    /// Sends the call and reads the whole reply body.
    pub(crate) fn exchange(
        &self,
        out: Outgoing,
    ) -> impl Future<Output = crate::Result<(ReplyHead, Bytes)>> + Send + 'static {
        let timeout = self.timeout_for(&out);
        let url = out.url().clone();
        let pending = self.transport.send(out);

        with_timeout(
            async move {
                let reply = pending.await?;
                let (head, body) = reply.into_parts();
                debug!("{} {}", head.status(), head.url());
                let bytes = body
                    .collect()
                    .await
                    .map_err(|e| crate::error::transport(e).with_url(head.url().clone()))?
                    .to_bytes();
                Ok((head, bytes))
            },
            timeout,
            url,
        )
    }

    /// Sends the call, leaving a successful reply's body unread.
    ///
    /// An error status is classified here, since its body has to be read
    /// to build the error.
    pub(crate) fn exchange_reply(
        &self,
        out: Outgoing,
    ) -> impl Future<Output = crate::Result<Reply>> + Send + 'static {
        let timeout = self.timeout_for(&out);
        let url = out.url().clone();
        let pending = self.transport.send(out);
        let codec = self.codec.clone();

        with_timeout(
            async move {
                let reply = pending.await?;
                debug!("{} {}", reply.status(), reply.url());
                if reply.status().is_success() {
                    return Ok(reply);
                }
                let (head, body) = reply.into_parts();
                let bytes = body
                    .collect()
                    .await
                    .map_err(|e| crate::error::transport(e).with_url(head.url().clone()))?
                    .to_bytes();
                Err(status_error(&codec, head, bytes))
            },
            timeout,
            url,
        )
    }

    /// Classifies the status, decodes the body and runs the filters that
    /// see fresh results.
    pub(crate) fn finish<T: ReturnType>(
        &self,
        head: ReplyHead,
        body: Bytes,
        call: &Call<'_>,
    ) -> crate::Result<T> {
        if !head.status().is_success() {
            return Err(status_error(&self.codec, head, body));
        }

        let mut value: T = decode(&self.codec, &body)
            .map_err(|e| crate::error::decode(e).with_url(head.url().clone()))?;

        if self.filters.results_response.is_some() {
            let entry: Entry = Arc::new(value.clone());
            self.filters.record(&head, Some(entry), call);
        }
        self.filters
            .on_response(&head, Some(&mut value as &mut dyn Any))?;
        Ok(value)
    }

    /// The `finish` stage of calls returning the raw reply.
    pub(crate) fn finish_reply(&self, reply: Reply, call: &Call<'_>) -> crate::Result<Reply> {
        self.filters.record(reply.head(), None, call);
        self.filters.on_response(reply.head(), None)?;
        Ok(reply)
    }
}

impl<C> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Pipeline");
        builder
            .field("base_url", &self.base.as_str())
            .field("headers", &self.headers);
        self.timeout.fmt_as_field(&mut builder);
        builder.field("filters", &self.filters).finish()
    }
}

fn with_timeout<F, T>(
    fut: F,
    timeout: Option<Duration>,
    url: Url,
) -> impl Future<Output = crate::Result<T>> + Send + 'static
where
    F: Future<Output = crate::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async move {
        match timeout {
            Some(duration) => match tokio::time::timeout(duration, fut).await {
                Ok(res) => res,
                Err(_elapsed) => {
                    trace!("call timed out after {:?}", duration);
                    Err(crate::error::timed_out().with_url(url))
                }
            },
            None => fut.await,
        }
    }
}

fn cached<T: ReturnType>(entry: &Entry, call: &Call<'_>) -> crate::Result<T> {
    match entry.downcast_ref::<T>() {
        Some(value) => Ok(value.clone()),
        None => Err(crate::error::filter(
            FilterStage::Results,
            EntryMismatch {
                expected: type_name::<T>(),
            },
        )
        .with_url(call.url().clone())),
    }
}

/// Decodes a successful reply body.
///
/// `()` ignores whatever body the service sent. An empty body is accepted
/// for other types that can be built from nothing, such as `Option<T>`.
pub(crate) fn decode<C: Decoder, T: DeserializeOwned>(
    codec: &C,
    body: &[u8],
) -> Result<T, BoxError> {
    if let Ok(value) = <T as Deserialize<'_>>::deserialize(Discard) {
        return Ok(value);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        let unit = UnitDeserializer::<serde::de::value::Error>::new();
        if let Ok(value) = <T as Deserialize<'_>>::deserialize(unit) {
            return Ok(value);
        }
    }
    codec.decode(body).map_err(Into::into)
}

/// Builds unit types without looking at the body; anything else is refused.
struct Discard;

impl<'de> Deserializer<'de> for Discard {
    type Error = serde::de::value::Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
        Err(de::Error::custom("reply body is needed"))
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option newtype_struct seq tuple tuple_struct map struct
        enum identifier ignored_any
    }
}

pub(crate) fn status_error<C: Decoder>(codec: &C, head: ReplyHead, body: Bytes) -> crate::Error {
    let response_status = codec
        .decode::<ErrorResponse>(&body)
        .ok()
        .and_then(|res| res.response_status);
    debug!(
        "error status {} from {} ({} bytes)",
        head.status(),
        head.url(),
        body.len()
    );
    crate::error::status_code(head.url().clone(), head.status(), response_status, body)
}

#[derive(Debug)]
struct EntryMismatch {
    expected: &'static str,
}

impl fmt::Display for EntryMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cached entry is not a `{}`", self.expected)
    }
}

impl std::error::Error for EntryMismatch {}

#[derive(Debug)]
struct NotCacheable;

impl fmt::Display for NotCacheable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a raw reply cannot be answered from a cache")
    }
}

impl std::error::Error for NotCacheable {}
