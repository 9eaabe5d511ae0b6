use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use url::Url;

/// A `Result` alias where the `Err` case is `service_client::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error, as returned by filters and transports.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The Errors that may occur when making a call.
///
/// Each error belongs to exactly one kind, queried with the `is_*`
/// predicates. The kinds never overlap: a filter that fails is never
/// reported as a transport fault, and a reply with an error status is
/// never reported as a decode fault.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    url: Option<Url>,
}

/// The extension point a filter fault was raised from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStage {
    /// The request filter, run before the call is sent.
    Request,
    /// The results filter, consulted for a cached result.
    Results,
    /// The results filter response, called with each fresh result.
    ResultsResponse,
    /// The response filter, run on each fresh result.
    Response,
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            FilterStage::Request => "request filter",
            FilterStage::Results => "results filter",
            FilterStage::ResultsResponse => "results filter response",
            FilterStage::Response => "response filter",
        })
    }
}

/// The structured error body a service returns alongside an error status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatus {
    /// A machine-readable error code, usually the exception type name.
    #[serde(default, alias = "ErrorCode")]
    pub error_code: Option<String>,
    /// A human-readable message.
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
    /// The server-side stack trace, when the service exposes it.
    #[serde(default, alias = "StackTrace")]
    pub stack_trace: Option<String>,
    /// Per-field validation errors.
    #[serde(default, alias = "Errors")]
    pub errors: Vec<FieldError>,
}

/// A single field validation error inside a [`ResponseStatus`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// The validation rule that failed.
    #[serde(default, alias = "ErrorCode")]
    pub error_code: Option<String>,
    /// The request field the error refers to.
    #[serde(default, alias = "FieldName")]
    pub field_name: Option<String>,
    /// A human-readable message.
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(rename = "responseStatus", alias = "ResponseStatus")]
    pub(crate) response_status: Option<ResponseStatus>,
}

impl Error {
    fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                url: None,
            }),
        }
    }

    /// Returns a possible URL related to this error.
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Returns a mutable reference to the URL related to this error.
    ///
    /// This is useful if you need to remove sensitive information from the URL
    /// (e.g. an API key in the query), but do not want to remove the URL
    /// entirely.
    pub fn url_mut(&mut self) -> Option<&mut Url> {
        self.inner.url.as_mut()
    }

    /// Add a url related to this error (overwriting any existing)
    pub fn with_url(mut self, url: Url) -> Self {
        self.inner.url = Some(url);
        self
    }

    /// Strip the related url from this error (if, for example, it contains
    /// sensitive information)
    pub fn without_url(mut self) -> Self {
        self.inner.url = None;
        self
    }

    /// Returns true if the error came from building the call target.
    pub fn is_builder(&self) -> bool {
        matches!(self.inner.kind, Kind::Builder)
    }

    /// Returns true if the request could not be encoded to a query or body.
    pub fn is_encode(&self) -> bool {
        matches!(self.inner.kind, Kind::Encode)
    }

    /// Returns true if the error happened while talking to the server.
    ///
    /// This covers connection failures, timeouts and interrupted bodies.
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport)
    }

    /// Returns true if the error is related to a timeout.
    pub fn is_timeout(&self) -> bool {
        let mut source = self.source();

        while let Some(err) = source {
            if err.is::<TimedOut>() {
                return true;
            }
            if let Some(io) = err.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::TimedOut {
                    return true;
                }
            }
            source = err.source();
        }

        false
    }

    /// Returns true if the error is related to connecting.
    pub fn is_connect(&self) -> bool {
        let mut source = self.source();

        while let Some(err) = source {
            if let Some(legacy) = err.downcast_ref::<hyper_util::client::legacy::Error>() {
                if legacy.is_connect() {
                    return true;
                }
            }
            source = err.source();
        }

        false
    }

    /// Returns true if the server replied with a non-success status.
    pub fn is_status(&self) -> bool {
        matches!(self.inner.kind, Kind::Status(..))
    }

    /// Returns true if a successful reply could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, Kind::Decode)
    }

    /// Returns true if one of the client's filters failed.
    pub fn is_filter(&self) -> bool {
        matches!(self.inner.kind, Kind::Filter(_))
    }

    /// Returns the status code, if the error was generated from a reply.
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.kind {
            Kind::Status(ref status) => Some(status.code),
            _ => None,
        }
    }

    /// Returns the structured error body of an error reply, if the service
    /// sent one that could be decoded.
    pub fn response_status(&self) -> Option<&ResponseStatus> {
        match self.inner.kind {
            Kind::Status(ref status) => status.response_status.as_ref(),
            _ => None,
        }
    }

    /// Returns the raw body of an error reply.
    pub fn body(&self) -> Option<&Bytes> {
        match self.inner.kind {
            Kind::Status(ref status) => Some(&status.body),
            _ => None,
        }
    }

    /// Returns the extension point that failed, for filter faults.
    pub fn filter_stage(&self) -> Option<FilterStage> {
        match self.inner.kind {
            Kind::Filter(stage) => Some(stage),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("service_client::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref url) = self.inner.url {
            builder.field("url", &url.as_str());
        }
        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Builder => f.write_str("builder error")?,
            Kind::Encode => f.write_str("error encoding request")?,
            Kind::Transport => f.write_str("error sending request")?,
            Kind::Decode => f.write_str("error decoding response body")?,
            Kind::Filter(stage) => write!(f, "{stage} failed")?,
            Kind::Status(ref status) => {
                let prefix = if status.code.is_client_error() {
                    "HTTP status client error"
                } else if status.code.is_server_error() {
                    "HTTP status server error"
                } else {
                    "HTTP status"
                };
                write!(f, "{prefix} ({})", status.code)?;
                if let Some(message) = status
                    .response_status
                    .as_ref()
                    .and_then(|rs| rs.message.as_deref())
                {
                    write!(f, ": {message}")?;
                }
            }
        };

        if let Some(url) = &self.inner.url {
            write!(f, " for url ({url})")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    Builder,
    Encode,
    Transport,
    Status(Box<StatusError>),
    Decode,
    Filter(FilterStage),
}

#[derive(Debug)]
pub(crate) struct StatusError {
    code: StatusCode,
    response_status: Option<ResponseStatus>,
    body: Bytes,
}

// constructors

pub(crate) fn builder<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Builder, Some(e))
}

pub(crate) fn encode<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Encode, Some(e))
}

pub(crate) fn transport<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Transport, Some(e))
}

pub(crate) fn decode<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Decode, Some(e))
}

pub(crate) fn filter<E: Into<BoxError>>(stage: FilterStage, e: E) -> Error {
    Error::new(Kind::Filter(stage), Some(e))
}

pub(crate) fn status_code(
    url: Url,
    code: StatusCode,
    response_status: Option<ResponseStatus>,
    body: Bytes,
) -> Error {
    Error::new(
        Kind::Status(Box::new(StatusError {
            code,
            response_status,
            body,
        })),
        None::<Error>,
    )
    .with_url(url)
}

pub(crate) fn timed_out() -> Error {
    transport(TimedOut)
}

#[cfg(feature = "blocking")]
pub(crate) fn blocking_in_async() -> Error {
    transport(BlockingClientInAsyncContext)
}

// internal Error "sources"

#[derive(Debug)]
pub(crate) struct TimedOut;

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

#[cfg(feature = "blocking")]
#[derive(Debug)]
pub(crate) struct BlockingClientInAsyncContext;

#[cfg(feature = "blocking")]
impl fmt::Display for BlockingClientInAsyncContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("blocking client used inside of an async runtime")
    }
}

#[cfg(feature = "blocking")]
impl StdError for BlockingClientInAsyncContext {}
