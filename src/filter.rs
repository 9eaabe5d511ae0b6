//! Filters to intercept a call on its way out and its result on the way back.
//!
//! A client has four extension points, each holding at most one filter.
//! They always run in this order:
//!
//! 1. [`RequestFilter`], with the built request, before anything else.
//! 2. [`ResultsFilter`], which may answer the call from a cache. If it
//!    does, the transport and the remaining filters are skipped.
//! 3. The transport sends the call.
//! 4. [`ResultsFilterResponse`], with the fresh result, e.g. to store it.
//! 5. [`ResponseFilter`], with the fresh result, before it is returned.
//!
//! Each filter runs at most once per call, in both the blocking and the
//! non-blocking client. Closures with the matching signature implement the
//! traits.
//!
//! # Example
//!
//! A cache made of a results filter and a results filter response:
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::{Arc, Mutex};
//!
//! use service_client::filter::{Call, Entry};
//! use service_client::{BoxError, ReplyHead};
//!
//! let cache: Arc<Mutex<HashMap<String, Entry>>> = Default::default();
//!
//! let read = cache.clone();
//! let lookup = move |call: &Call<'_>| -> Result<Option<Entry>, BoxError> {
//!     Ok(read.lock().unwrap().get(&call.cache_key()).cloned())
//! };
//!
//! let write = cache.clone();
//! let record = move |_: &ReplyHead, result: Option<Entry>, call: &Call<'_>| -> Result<(), BoxError> {
//!     if let Some(result) = result {
//!         write.lock().unwrap().insert(call.cache_key(), result);
//!     }
//!     Ok(())
//! };
//!
//! # fn run(lookup: impl service_client::filter::ResultsFilter + 'static,
//! #        record: impl service_client::filter::ResultsFilterResponse + 'static)
//! #        -> service_client::Result<()> {
//! let client = service_client::Client::builder()
//!     .base_url("http://localhost:1337/")
//!     .results_filter(lookup)
//!     .results_filter_response(record)
//!     .build()?;
//! # drop(client);
//! # Ok(())
//! # }
//! # run(lookup, record).unwrap();
//! ```

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use http::Method;
use url::Url;

use crate::error::{BoxError, FilterStage};
use crate::reply::ReplyHead;
use crate::request::Outgoing;

/// A cached result, shared between a cache and the calls it answers.
pub type Entry = Arc<dyn Any + Send + Sync>;

/// Filter that gets called with the built request, before it is sent.
pub trait RequestFilter: Send + Sync {
    /// Inspect or change the request's headers and per-call settings.
    fn filter(&self, request: &mut Outgoing) -> Result<(), BoxError>;
}

/// Filter that may answer a call without sending it.
pub trait ResultsFilter: Send + Sync {
    /// Return a cached result for the call, or `None` to send it.
    ///
    /// A returned entry must hold a value of the call's response type.
    fn lookup(&self, call: &Call<'_>) -> Result<Option<Entry>, BoxError>;
}

/// Filter that gets called with every result fetched from the server.
pub trait ResultsFilterResponse: Send + Sync {
    /// Observe a fresh result.
    ///
    /// `result` is `None` for calls that return the raw reply. An error
    /// returned here is logged; it does not fail the call.
    fn record(&self, reply: &ReplyHead, result: Option<Entry>, call: &Call<'_>)
        -> Result<(), BoxError>;
}

/// Filter that gets called with every result fetched from the server,
/// right before it is returned.
pub trait ResponseFilter: Send + Sync {
    /// Inspect or adjust the decoded result.
    ///
    /// `result` is `None` for calls that return the raw reply.
    fn filter(&self, reply: &ReplyHead, result: Option<&mut dyn Any>) -> Result<(), BoxError>;
}

impl<F> RequestFilter for F
where
    F: Fn(&mut Outgoing) -> Result<(), BoxError> + Send + Sync,
{
    fn filter(&self, request: &mut Outgoing) -> Result<(), BoxError> {
        self(request)
    }
}

impl<F> ResultsFilter for F
where
    F: Fn(&Call<'_>) -> Result<Option<Entry>, BoxError> + Send + Sync,
{
    fn lookup(&self, call: &Call<'_>) -> Result<Option<Entry>, BoxError> {
        self(call)
    }
}

impl<F> ResultsFilterResponse for F
where
    F: Fn(&ReplyHead, Option<Entry>, &Call<'_>) -> Result<(), BoxError> + Send + Sync,
{
    fn record(
        &self,
        reply: &ReplyHead,
        result: Option<Entry>,
        call: &Call<'_>,
    ) -> Result<(), BoxError> {
        self(reply, result, call)
    }
}

impl<F> ResponseFilter for F
where
    F: Fn(&ReplyHead, Option<&mut dyn Any>) -> Result<(), BoxError> + Send + Sync,
{
    fn filter(&self, reply: &ReplyHead, result: Option<&mut dyn Any>) -> Result<(), BoxError> {
        self(reply, result)
    }
}

/// What a call returns to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseType {
    name: &'static str,
    id: TypeId,
    raw: bool,
}

impl ResponseType {
    pub(crate) fn of<T: Any>() -> ResponseType {
        ResponseType {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
            raw: false,
        }
    }

    pub(crate) fn raw_reply() -> ResponseType {
        ResponseType {
            name: type_name::<crate::Reply>(),
            id: TypeId::of::<crate::Reply>(),
            raw: true,
        }
    }

    /// The type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The `TypeId` of the response type.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Whether the call returns the raw reply instead of a decoded value.
    pub fn is_raw_reply(&self) -> bool {
        self.raw
    }
}

/// A description of one call, as seen by results filters.
pub struct Call<'a> {
    method: Method,
    url: Url,
    response_type: ResponseType,
    request: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> Call<'a> {
    pub(crate) fn new(
        method: Method,
        url: Url,
        response_type: ResponseType,
        request: Option<&'a (dyn Any + Send + Sync)>,
    ) -> Call<'a> {
        Call {
            method,
            url,
            response_type,
            request,
        }
    }

    /// The verb of the call.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The fully resolved URL, including any query.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The type the call returns.
    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// The typed request, if the call was made with one.
    ///
    /// Raw calls, made with an explicit path and body, have none.
    pub fn request<R: Any>(&self) -> Option<&R> {
        self.request.and_then(|req| req.downcast_ref::<R>())
    }

    /// The cache key of the call: its verb and resolved URL, e.g.
    /// `GET http://localhost/json/reply/GetCustomer?customerId=5`.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

impl fmt::Debug for Call<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("response_type", &self.response_type.name)
            .finish()
    }
}

/// The filters registered on a client, one slot per extension point.
#[derive(Clone, Default)]
pub(crate) struct Filters {
    pub(crate) request: Option<Arc<dyn RequestFilter>>,
    pub(crate) results: Option<Arc<dyn ResultsFilter>>,
    pub(crate) results_response: Option<Arc<dyn ResultsFilterResponse>>,
    pub(crate) response: Option<Arc<dyn ResponseFilter>>,
}

impl Filters {
    pub(crate) fn on_request(&self, request: &mut Outgoing) -> crate::Result<()> {
        match self.request {
            Some(ref filter) => filter
                .filter(request)
                .map_err(|e| stage_error(FilterStage::Request, e, request.url())),
            None => Ok(()),
        }
    }

    pub(crate) fn lookup(&self, call: &Call<'_>) -> crate::Result<Option<Entry>> {
        match self.results {
            Some(ref filter) => filter
                .lookup(call)
                .map_err(|e| stage_error(FilterStage::Results, e, call.url())),
            None => Ok(None),
        }
    }

    // Failures here never fail the call, they are only reported.
    pub(crate) fn record(&self, reply: &ReplyHead, result: Option<Entry>, call: &Call<'_>) {
        if let Some(ref filter) = self.results_response {
            if let Err(e) = filter.record(reply, result, call) {
                let err = stage_error(FilterStage::ResultsResponse, e, call.url());
                log::warn!("{err}: {}", SourceChain(&err));
            }
        }
    }

    pub(crate) fn on_response(
        &self,
        reply: &ReplyHead,
        result: Option<&mut dyn Any>,
    ) -> crate::Result<()> {
        match self.response {
            Some(ref filter) => filter
                .filter(reply, result)
                .map_err(|e| stage_error(FilterStage::Response, e, reply.url())),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Filters")
            .field("request", &self.request.is_some())
            .field("results", &self.results.is_some())
            .field("results_response", &self.results_response.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

fn stage_error(stage: FilterStage, e: BoxError, url: &Url) -> crate::Error {
    crate::error::filter(stage, e).with_url(url.clone())
}

struct SourceChain<'a>(&'a crate::Error);

impl fmt::Display for SourceChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut source = std::error::Error::source(self.0);
        let mut first = true;
        while let Some(err) = source {
            if !first {
                f.write_str(": ")?;
            }
            write!(f, "{err}")?;
            first = false;
            source = err.source();
        }
        Ok(())
    }
}
