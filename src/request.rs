use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use http::header::{HeaderValue, CONTENT_LENGTH};
use http::{Extensions, HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::body::Body;
use crate::codec::Codec;
use crate::config::{RequestConfig, TotalTimeout};
use crate::error::BoxError;
use crate::into_url;

/// A typed request to a remote service.
///
/// The request's serialized fields become the query string of `GET` and
/// `DELETE` calls, or the encoded body of `POST`, `PUT` and `PATCH` calls.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use service_client::Operation;
///
/// #[derive(Serialize)]
/// #[serde(rename_all = "camelCase")]
/// struct GetCustomer {
///     customer_id: i32,
/// }
///
/// #[derive(Clone, Deserialize)]
/// struct GetCustomerResponse {
///     customer: Customer,
/// }
///
/// #[derive(Clone, Deserialize)]
/// struct Customer {
///     id: i32,
/// }
///
/// impl Operation for GetCustomer {
///     type Response = GetCustomerResponse;
///     const NAME: &'static str = "GetCustomer";
/// }
/// ```
pub trait Operation: Serialize + Send + Sync + 'static {
    /// The type a successful reply decodes into.
    ///
    /// Use `()` for operations that return nothing.
    type Response: ReturnType;

    /// The operation name, used by the default route.
    const NAME: &'static str;

    /// An explicit route relative to the client's base URL.
    ///
    /// Defaults to `None`, which resolves to `{format}/reply/{NAME}`.
    fn route(&self) -> Option<Cow<'_, str>> {
        None
    }
}

/// Values a call can decode a reply into.
///
/// Implemented for every `DeserializeOwned` type that can also be cloned
/// and shared between threads, which lets results filters hand back
/// cached values.
pub trait ReturnType: DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> ReturnType for T where T: DeserializeOwned + Clone + Send + Sync + 'static {}

/// The default route of an operation for a codec format, e.g.
/// `json/reply/GetCustomer`.
pub fn reply_path<R: Operation>(format: &str) -> String {
    format!("{}/reply/{}", format, R::NAME)
}

/// The relative path a request resolves to, before any query is added.
pub(crate) fn path_for<C: Codec, R: Operation>(request: &R) -> String {
    match request.route() {
        Some(route) => route.into_owned(),
        None => reply_path::<R>(C::FORMAT),
    }
}

/// Whether calls with this verb carry the request in their body.
pub(crate) fn has_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Builds the resolved URL and body of a typed call.
pub(crate) fn typed<C: Codec, R: Operation>(
    codec: &C,
    base: &Url,
    method: &Method,
    request: &R,
) -> crate::Result<(Url, Option<Body>)> {
    let mut url = into_url::join(base, &path_for::<C, R>(request))?;

    if has_body(method) {
        let body = codec
            .encode(request)
            .map_err(|e| crate::error::encode(e).with_url(url.clone()))?;
        return Ok((url, Some(Body::from(body))));
    }

    let query = query_pairs(request)
        .and_then(|pairs| serde_urlencoded::to_string(pairs).map_err(Into::into))
        .map_err(|e| crate::error::encode(e).with_url(url.clone()))?;
    append_query(&mut url, &query);
    Ok((url, None))
}

/// Builds the resolved URL of a raw call; the path is used verbatim.
pub(crate) fn raw(base: &Url, path: &str) -> crate::Result<Url> {
    into_url::join(base, path)
}

/// Flattens a request into query pairs, in field order.
///
/// Scalars use their plain textual form and `None` fields are left out.
/// Sequences of scalars are joined with commas. Nested structures have no
/// query form.
fn query_pairs<R: Serialize>(request: &R) -> Result<Vec<(String, String)>, BoxError> {
    let fields = match serde_json::to_value(request)? {
        Value::Object(fields) => fields,
        Value::Null => return Ok(Vec::new()),
        _ => return Err("a query request must serialize to a struct".into()),
    };

    let mut pairs = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        let text = match value {
            Value::Null => continue,
            Value::Array(items) => items
                .iter()
                .map(|item| scalar(&name, item))
                .collect::<Result<Vec<_>, _>>()?
                .join(","),
            other => scalar(&name, &other)?,
        };
        pairs.push((name, text));
    }
    Ok(pairs)
}

fn scalar(field: &str, value: &Value) -> Result<String, NoQueryForm> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(NoQueryForm {
            field: field.to_owned(),
        }),
    }
}

#[derive(Debug)]
struct NoQueryForm {
    field: String,
}

impl fmt::Display for NoQueryForm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "field `{}` is nested and has no query form", self.field)
    }
}

impl std::error::Error for NoQueryForm {}

fn append_query(url: &mut Url, query: &str) {
    if query.is_empty() {
        return;
    }
    let joined = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query.to_owned(),
    };
    url.set_query(Some(&joined));
}

/// A call on its way to the transport.
///
/// The verb and URL are fixed once the call is built; request filters can
/// only change the headers and per-call settings.
pub struct Outgoing {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
    extensions: Extensions,
}

impl Outgoing {
    pub(crate) fn new(method: Method, url: Url, headers: HeaderMap, body: Option<Body>) -> Self {
        Outgoing {
            method,
            url,
            headers,
            body,
            extensions: Extensions::new(),
        }
    }

    /// Get the method.
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the url.
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the headers.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a mutable reference to the headers.
    ///
    /// Changes only apply to this call; the client's header store is left
    /// untouched.
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get the body.
    #[inline]
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Get the timeout of this call, if one overrides the client's.
    #[inline]
    pub fn timeout(&self) -> Option<&Duration> {
        RequestConfig::<TotalTimeout>::get(&self.extensions)
    }

    /// Get a mutable reference to the timeout of this call.
    #[inline]
    pub fn timeout_mut(&mut self) -> &mut Option<Duration> {
        RequestConfig::<TotalTimeout>::get_mut(&mut self.extensions)
    }

    /// Get the extensions.
    #[inline]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Get a mutable reference to the extensions.
    #[inline]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Converts the call into an `http::Request`, for transports built on
    /// the `http` types.
    pub fn into_http(self) -> crate::Result<http::Request<Body>> {
        let uri = into_url::try_uri(&self.url)?;
        let mut headers = self.headers;
        if let Some(len) = self.body.as_ref().and_then(Body::content_length) {
            if !headers.contains_key(CONTENT_LENGTH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
        }
        let mut req = http::Request::new(self.body.unwrap_or_default());
        *req.method_mut() = self.method;
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;
        *req.extensions_mut() = self.extensions;
        Ok(req)
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Outgoing")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish()
    }
}
