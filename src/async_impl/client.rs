use std::any::Any;
use std::convert::TryInto;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use http::Method;
use url::Url;

use crate::body::Body;
use crate::codec::{Codec, Json};
use crate::config::RequestConfig;
use crate::filter::{
    Call, Filters, RequestFilter, ResponseFilter, ResponseType, ResultsFilter,
    ResultsFilterResponse,
};
use crate::into_url::{self, IntoUrl};
use crate::pipeline::Pipeline;
use crate::reply::Reply;
use crate::request::{self, Operation, Outgoing, ReturnType};
use crate::transport::{HttpTransport, Transport};

static DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// An asynchronous `Client` to call a service with.
///
/// Every call is resolved against the client's base URL, sent with the
/// client's headers and passed through its filters. The client holds a
/// connection pool internally, so it is advised that you create one and
/// **reuse** it.
///
/// # Example
///
/// ```no_run
/// # use serde::{Deserialize, Serialize};
/// # use service_client::Operation;
/// #
/// # #[derive(Serialize)]
/// # #[serde(rename_all = "camelCase")]
/// # struct GetCustomer { customer_id: i32 }
/// # #[derive(Clone, Deserialize)]
/// # struct GetCustomerResponse { created: u64 }
/// # impl Operation for GetCustomer {
/// #     type Response = GetCustomerResponse;
/// #     const NAME: &'static str = "GetCustomer";
/// # }
/// # async fn run() -> Result<(), service_client::Error> {
/// let client = service_client::Client::new("http://localhost:1337/")?;
/// let res = client.get(&GetCustomer { customer_id: 5 }).await?;
/// println!("created {}", res.created);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client<C = Json> {
    pipeline: Pipeline<C>,
}

/// A `ClientBuilder` can be used to create a `Client` with custom
/// configuration.
#[must_use]
pub struct ClientBuilder<C = Json> {
    config: Config<C>,
}

struct Config<C> {
    // NOTE: When adding a new field, update `fmt::Debug for ClientBuilder`
    error: Option<crate::Error>,
    base: Option<Url>,
    headers: HeaderMap,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    codec: C,
    transport: Option<Arc<dyn Transport>>,
    filters: Filters,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Constructs a new `ClientBuilder` using the JSON codec.
    ///
    /// This is the same as `Client::builder()`.
    pub fn new() -> ClientBuilder {
        let mut headers: HeaderMap<HeaderValue> = HeaderMap::with_capacity(2);
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        ClientBuilder {
            config: Config {
                error: None,
                base: None,
                headers,
                timeout: None,
                connect_timeout: None,
                codec: Json,
                transport: None,
                filters: Filters::default(),
            },
        }
    }
}

impl<C: Codec> ClientBuilder<C> {
    /// Returns a `Client` that uses this `ClientBuilder` configuration.
    ///
    /// # Errors
    ///
    /// This method fails if no base URL was set, or if one of the
    /// configured values was invalid.
    pub fn build(self) -> crate::Result<Client<C>> {
        self.build_pipeline().map(|pipeline| Client { pipeline })
    }

    pub(crate) fn build_pipeline(self) -> crate::Result<Pipeline<C>> {
        let mut config = self.config;

        if let Some(err) = config.error {
            return Err(err);
        }
        let base = config
            .base
            .ok_or_else(|| crate::error::builder("a base URL is required"))?;

        if !config.headers.contains_key(ACCEPT) {
            config
                .headers
                .insert(ACCEPT, HeaderValue::from_static(C::CONTENT_TYPE));
        }

        let transport = match config.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_connect_timeout(config.connect_timeout)),
        };

        Ok(Pipeline {
            codec: config.codec,
            base,
            headers: config.headers,
            timeout: RequestConfig::new(config.timeout),
            transport,
            filters: config.filters,
        })
    }

    /// Sets the base URL every call is resolved against.
    ///
    /// The URL must use the `http` or `https` scheme and name a host. Any
    /// query or fragment is dropped, and a trailing `/` is added, so that
    /// `http://host/api` and `http://host/api/` behave the same.
    pub fn base_url<U: IntoUrl>(mut self, url: U) -> ClientBuilder<C> {
        match into_url::base(url) {
            Ok(url) => self.config.base = Some(url),
            Err(err) => self.config.error = Some(err),
        }
        self
    }

    /// Sets the `User-Agent` header to be used by this client.
    pub fn user_agent<V>(mut self, value: V) -> ClientBuilder<C>
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        match value.try_into() {
            Ok(value) => {
                self.config.headers.insert(USER_AGENT, value);
            }
            Err(e) => {
                self.config.error = Some(crate::error::builder(e.into()));
            }
        };
        self
    }

    /// Sets the default headers for every call.
    ///
    /// Headers given here replace the defaults with the same name, such
    /// as `Accept` and `User-Agent`.
    pub fn default_headers(mut self, headers: HeaderMap) -> ClientBuilder<C> {
        for (key, value) in headers.iter() {
            self.config.headers.insert(key, value.clone());
        }
        self
    }

    /// Enables a total call timeout.
    ///
    /// The timeout is applied from when the call starts connecting until
    /// the reply body has finished. For calls returning the raw reply, it
    /// ends once the reply headers arrive.
    ///
    /// Default is no timeout. A request filter can override it for a
    /// single call through [`Outgoing::timeout_mut`].
    pub fn timeout(mut self, timeout: Duration) -> ClientBuilder<C> {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set a timeout for only the connect phase of the default transport.
    ///
    /// Default is `None`.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClientBuilder<C> {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Replaces the transport calls are sent with.
    ///
    /// `connect_timeout` only applies to the default transport.
    pub fn transport<T: Transport>(mut self, transport: T) -> ClientBuilder<C> {
        self.config.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the codec used to encode request bodies and decode replies.
    ///
    /// The codec also picks the default `Accept` header and the format
    /// segment of default operation paths.
    pub fn codec<D: Codec>(self, codec: D) -> ClientBuilder<D> {
        let config = self.config;
        ClientBuilder {
            config: Config {
                error: config.error,
                base: config.base,
                headers: config.headers,
                timeout: config.timeout,
                connect_timeout: config.connect_timeout,
                codec,
                transport: config.transport,
                filters: config.filters,
            },
        }
    }

    /// Sets the filter run with every built request, before anything else.
    pub fn request_filter<F: RequestFilter + 'static>(mut self, filter: F) -> ClientBuilder<C> {
        self.config.filters.request = Some(Arc::new(filter));
        self
    }

    /// Sets the filter that may answer calls from a cache.
    pub fn results_filter<F: ResultsFilter + 'static>(mut self, filter: F) -> ClientBuilder<C> {
        self.config.filters.results = Some(Arc::new(filter));
        self
    }

    /// Sets the filter called with every fresh result.
    pub fn results_filter_response<F>(mut self, filter: F) -> ClientBuilder<C>
    where
        F: ResultsFilterResponse + 'static,
    {
        self.config.filters.results_response = Some(Arc::new(filter));
        self
    }

    /// Sets the filter run with every fresh result, right before it is
    /// returned.
    pub fn response_filter<F: ResponseFilter + 'static>(mut self, filter: F) -> ClientBuilder<C> {
        self.config.filters.response = Some(Arc::new(filter));
        self
    }
}

impl<C> fmt::Debug for ClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("ClientBuilder");
        if let Some(ref base) = self.config.base {
            builder.field("base_url", &base.as_str());
        }
        builder.field("headers", &self.config.headers);
        if let Some(ref d) = self.config.timeout {
            builder.field("timeout", d);
        }
        if let Some(ref d) = self.config.connect_timeout {
            builder.field("connect_timeout", d);
        }
        if self.config.transport.is_some() {
            builder.field("transport", &"custom");
        }
        builder.field("filters", &self.config.filters).finish()
    }
}

impl Client {
    /// Constructs a new `Client` calling the service at `base_url`.
    ///
    /// # Errors
    ///
    /// This method fails if `base_url` is not a usable `http` or `https`
    /// URL. Use `Client::builder()` to configure the client further.
    pub fn new<U: IntoUrl>(base_url: U) -> crate::Result<Client> {
        ClientBuilder::new().base_url(base_url).build()
    }

    /// Creates a `ClientBuilder` to configure a `Client`.
    ///
    /// This is the same as `ClientBuilder::new()`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<C: Codec> Client<C> {
    /// Call an operation with `GET`, sending its fields as the query.
    pub async fn get<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::GET, request).await
    }

    /// Call an operation with `POST`, sending it as the body.
    pub async fn post<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::POST, request).await
    }

    /// Call an operation with `PUT`, sending it as the body.
    pub async fn put<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::PUT, request).await
    }

    /// Call an operation with `PATCH`, sending it as the body.
    pub async fn patch<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::PATCH, request).await
    }

    /// Call an operation with `DELETE`, sending its fields as the query.
    pub async fn delete<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::DELETE, request).await
    }

    /// Call an operation with the default verb, `POST`.
    pub async fn send<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.post(request).await
    }

    /// `GET` an explicit path, relative to the base URL.
    ///
    /// The path may carry its own query; it is used as is.
    pub async fn get_raw<T: ReturnType>(&self, path: &str) -> crate::Result<T> {
        let out = self.pipeline.build_raw(Method::GET, path, None)?;
        self.execute(out, None).await
    }

    /// `DELETE` an explicit path, relative to the base URL.
    pub async fn delete_raw<T: ReturnType>(&self, path: &str) -> crate::Result<T> {
        let out = self.pipeline.build_raw(Method::DELETE, path, None)?;
        self.execute(out, None).await
    }

    /// `POST` an already encoded body to an explicit path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn run(client: service_client::Client) -> Result<(), service_client::Error> {
    /// let created: serde_json::Value = client
    ///     .post_raw("json/reply/GetCustomer", r#"{"customerId":5}"#)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn post_raw<T, B>(&self, path: &str, body: B) -> crate::Result<T>
    where
        T: ReturnType,
        B: Into<Body>,
    {
        let out = self.pipeline.build_raw(Method::POST, path, Some(body.into()))?;
        self.execute(out, None).await
    }

    /// `PUT` an already encoded body to an explicit path.
    pub async fn put_raw<T, B>(&self, path: &str, body: B) -> crate::Result<T>
    where
        T: ReturnType,
        B: Into<Body>,
    {
        let out = self.pipeline.build_raw(Method::PUT, path, Some(body.into()))?;
        self.execute(out, None).await
    }

    /// `PATCH` an already encoded body to an explicit path.
    pub async fn patch_raw<T, B>(&self, path: &str, body: B) -> crate::Result<T>
    where
        T: ReturnType,
        B: Into<Body>,
    {
        let out = self.pipeline.build_raw(Method::PATCH, path, Some(body.into()))?;
        self.execute(out, None).await
    }

    /// Call an operation with `GET` and return the raw reply.
    pub async fn get_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::GET, request).await
    }

    /// Call an operation with `POST` and return the raw reply.
    pub async fn post_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::POST, request).await
    }

    /// Call an operation with `PUT` and return the raw reply.
    pub async fn put_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::PUT, request).await
    }

    /// Call an operation with `DELETE` and return the raw reply.
    pub async fn delete_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::DELETE, request).await
    }

    /// Call an operation with any verb and return the raw reply.
    ///
    /// The body is left unread, so it can be streamed with
    /// [`Reply::chunk`]. A reply with an error status is still an error.
    ///
    /// # Errors
    ///
    /// Besides the errors of the typed calls, this fails with a filter
    /// error if the results filter answers the call: a raw reply cannot
    /// come from a cache.
    pub async fn reply<R: Operation>(&self, method: Method, request: &R) -> crate::Result<Reply> {
        let out = self.pipeline.build_typed(method, request)?;
        self.execute_reply(out, Some(request as &(dyn Any + Send + Sync)))
            .await
    }

    /// `POST` an already encoded body to an explicit path and return the
    /// raw reply.
    pub async fn post_raw_reply<B: Into<Body>>(&self, path: &str, body: B) -> crate::Result<Reply> {
        self.raw_reply(Method::POST, path, Some(body.into())).await
    }

    /// Call an explicit path with any verb and return the raw reply.
    ///
    /// The path and body are used as given. Filters run as they do for
    /// [`Client::reply`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn run(client: service_client::Client) -> Result<(), service_client::Error> {
    /// use service_client::Method;
    ///
    /// let reply = client
    ///     .raw_reply(Method::GET, "json/reply/GetCustomer?customerId=5", None)
    ///     .await?;
    /// println!("status: {}", reply.status());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn raw_reply(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
    ) -> crate::Result<Reply> {
        let out = self.pipeline.build_raw(method, path, body)?;
        self.execute_reply(out, None).await
    }

    /// The path, relative to the base URL, a request is sent to.
    ///
    /// Posting the encoded request to this path is the same as posting
    /// the request.
    pub fn path_for<R: Operation>(&self, request: &R) -> String {
        request::path_for::<C, R>(request)
    }

    /// The base URL every call is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.pipeline.base
    }

    /// Get the headers sent with every call.
    pub fn headers(&self) -> &HeaderMap {
        &self.pipeline.headers
    }

    /// Get a mutable reference to the headers sent with every call.
    ///
    /// Changes apply to every call started afterwards.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.pipeline.headers
    }

    /// Replaces the request filter.
    pub fn set_request_filter<F: RequestFilter + 'static>(&mut self, filter: F) {
        self.pipeline.filters.request = Some(Arc::new(filter));
    }

    /// Replaces the results filter.
    pub fn set_results_filter<F: ResultsFilter + 'static>(&mut self, filter: F) {
        self.pipeline.filters.results = Some(Arc::new(filter));
    }

    /// Replaces the results filter response.
    pub fn set_results_filter_response<F: ResultsFilterResponse + 'static>(&mut self, filter: F) {
        self.pipeline.filters.results_response = Some(Arc::new(filter));
    }

    /// Replaces the response filter.
    pub fn set_response_filter<F: ResponseFilter + 'static>(&mut self, filter: F) {
        self.pipeline.filters.response = Some(Arc::new(filter));
    }

    async fn typed<R: Operation>(&self, method: Method, request: &R) -> crate::Result<R::Response> {
        let out = self.pipeline.build_typed(method, request)?;
        self.execute(out, Some(request as &(dyn Any + Send + Sync)))
            .await
    }

    async fn execute<T: ReturnType>(
        &self,
        mut out: Outgoing,
        request: Option<&(dyn Any + Send + Sync)>,
    ) -> crate::Result<T> {
        let call = Call::new(
            out.method().clone(),
            out.url().clone(),
            ResponseType::of::<T>(),
            request,
        );
        if let Some(cached) = self.pipeline.prepare::<T>(&mut out, &call)? {
            return Ok(cached);
        }
        let (head, body) = self.pipeline.exchange(out).await?;
        self.pipeline.finish(head, body, &call)
    }

    async fn execute_reply(
        &self,
        mut out: Outgoing,
        request: Option<&(dyn Any + Send + Sync)>,
    ) -> crate::Result<Reply> {
        let call = Call::new(
            out.method().clone(),
            out.url().clone(),
            ResponseType::raw_reply(),
            request,
        );
        self.pipeline.prepare_reply(&mut out, &call)?;
        let reply = self.pipeline.exchange_reply(out).await?;
        self.pipeline.finish_reply(reply, &call)
    }
}

impl<C> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
