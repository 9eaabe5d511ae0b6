use std::any::Any;
use std::convert::TryInto;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::thread;
use std::time::Duration;

use http::header::{HeaderMap, HeaderValue};
use http::Method;
use log::{error, trace};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::body::Body;
use super::reply::Reply;
use super::wait;
use crate::async_impl;
use crate::codec::{Codec, Json};
use crate::config::RequestConfig;
use crate::filter::{
    Call, RequestFilter, ResponseFilter, ResponseType, ResultsFilter, ResultsFilterResponse,
};
use crate::into_url::IntoUrl;
use crate::pipeline::Pipeline;
use crate::request::{self, Operation, Outgoing, ReturnType};
use crate::transport::Transport;

/// A `Client` to call a service with, blocking the current thread until
/// each call completes.
///
/// Calls run through the same stages as with the async
/// [`Client`](crate::Client): the filters run on the calling thread, the
/// transport on a runtime thread owned by the client.
///
/// The `Client` holds a connection pool internally, so it is advised that
/// you create one and **reuse** it. Cloning it shares the pool and the
/// runtime thread.
///
/// # Examples
///
/// ```rust
/// # fn run() -> Result<(), service_client::Error> {
/// let client = service_client::blocking::Client::new("http://localhost:1337/")?;
/// # drop(client);
/// # Ok(())
/// # }
/// ```
///
/// # Async contexts
///
/// The blocking client must not be used from within an async runtime:
/// calls made there fail instead of parking a runtime thread.
#[derive(Clone)]
pub struct Client<C = Json> {
    pipeline: Pipeline<C>,
    inner: ClientHandle,
}

/// A `ClientBuilder` can be used to create a blocking `Client` with custom
/// configuration.
///
/// # Example
///
/// ```
/// # fn run() -> Result<(), service_client::Error> {
/// use std::time::Duration;
///
/// let client = service_client::blocking::Client::builder()
///     .base_url("http://localhost:1337/")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # drop(client);
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct ClientBuilder<C = Json> {
    inner: async_impl::ClientBuilder<C>,
    timeout: Timeout,
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
        ClientBuilder {
            inner: async_impl::ClientBuilder::new(),
            timeout: Timeout::default(),
        }
    }
}

impl<C: Codec> ClientBuilder<C> {
    /// Returns a `Client` that uses this `ClientBuilder` configuration.
    ///
    /// # Errors
    ///
    /// This method fails if no base URL was set, if one of the configured
    /// values was invalid, or if the runtime thread cannot be started.
    /// Building from within an async runtime fails as well.
    pub fn build(self) -> crate::Result<Client<C>> {
        let mut pipeline = self.inner.build_pipeline()?;
        pipeline.timeout = RequestConfig::new(self.timeout.0);
        ClientHandle::new().map(|inner| Client { pipeline, inner })
    }

    /// Sets the base URL every call is resolved against.
    pub fn base_url<U: IntoUrl>(self, url: U) -> ClientBuilder<C> {
        self.with_inner(move |inner| inner.base_url(url))
    }

    /// Sets the `User-Agent` header to be used by this client.
    pub fn user_agent<V>(self, value: V) -> ClientBuilder<C>
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.with_inner(move |inner| inner.user_agent(value))
    }

    /// Sets the default headers for every call.
    pub fn default_headers(self, headers: HeaderMap) -> ClientBuilder<C> {
        self.with_inner(move |inner| inner.default_headers(headers))
    }

    /// Set a timeout for connect, send and reading the reply body.
    ///
    /// Default is 30 seconds. Pass `None` to disable the timeout.
    pub fn timeout<T>(mut self, timeout: T) -> ClientBuilder<C>
    where
        T: Into<Option<Duration>>,
    {
        self.timeout = Timeout(timeout.into());
        self
    }

    /// Set a timeout for only the connect phase of the default transport.
    ///
    /// Default is `None`.
    pub fn connect_timeout(self, timeout: Duration) -> ClientBuilder<C> {
        self.with_inner(move |inner| inner.connect_timeout(timeout))
    }

    /// Replaces the transport calls are sent with.
    pub fn transport<T: Transport>(self, transport: T) -> ClientBuilder<C> {
        self.with_inner(move |inner| inner.transport(transport))
    }

    /// Sets the codec used to encode request bodies and decode replies.
    pub fn codec<D: Codec>(self, codec: D) -> ClientBuilder<D> {
        ClientBuilder {
            inner: self.inner.codec(codec),
            timeout: self.timeout,
        }
    }

    /// Sets the filter run with every built request, before anything else.
    pub fn request_filter<F: RequestFilter + 'static>(self, filter: F) -> ClientBuilder<C> {
        self.with_inner(move |inner| inner.request_filter(filter))
    }

    /// Sets the filter that may answer calls from a cache.
    pub fn results_filter<F: ResultsFilter + 'static>(self, filter: F) -> ClientBuilder<C> {
        self.with_inner(move |inner| inner.results_filter(filter))
    }

    /// Sets the filter called with every fresh result.
    pub fn results_filter_response<F>(self, filter: F) -> ClientBuilder<C>
    where
        F: ResultsFilterResponse + 'static,
    {
        self.with_inner(move |inner| inner.results_filter_response(filter))
    }

    /// Sets the filter run with every fresh result, right before it is
    /// returned.
    pub fn response_filter<F: ResponseFilter + 'static>(self, filter: F) -> ClientBuilder<C> {
        self.with_inner(move |inner| inner.response_filter(filter))
    }

    fn with_inner<F>(mut self, func: F) -> ClientBuilder<C>
    where
        F: FnOnce(async_impl::ClientBuilder<C>) -> async_impl::ClientBuilder<C>,
    {
        self.inner = func(self.inner);
        self
    }
}

impl<C> fmt::Debug for ClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("inner", &self.inner)
            .field("timeout", &self.timeout.0)
            .finish()
    }
}

impl Client {
    /// Constructs a new blocking `Client` calling the service at
    /// `base_url`.
    ///
    /// # Errors
    ///
    /// This method fails if `base_url` is not a usable `http` or `https`
    /// URL, or if it is called from within an async runtime.
    pub fn new<U: IntoUrl>(base_url: U) -> crate::Result<Client> {
        ClientBuilder::new().base_url(base_url).build()
    }

    /// Creates a `ClientBuilder` to configure a `Client`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<C: Codec> Client<C> {
    /// Call an operation with `GET`, sending its fields as the query.
    pub fn get<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::GET, request)
    }

    /// Call an operation with `POST`, sending it as the body.
    pub fn post<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::POST, request)
    }

    /// Call an operation with `PUT`, sending it as the body.
    pub fn put<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::PUT, request)
    }

    /// Call an operation with `PATCH`, sending it as the body.
    pub fn patch<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::PATCH, request)
    }

    /// Call an operation with `DELETE`, sending its fields as the query.
    pub fn delete<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.typed(Method::DELETE, request)
    }

    /// Call an operation with the default verb, `POST`.
    pub fn send<R: Operation>(&self, request: &R) -> crate::Result<R::Response> {
        self.post(request)
    }

    /// `GET` an explicit path, relative to the base URL.
    pub fn get_raw<T: ReturnType>(&self, path: &str) -> crate::Result<T> {
        let out = self.pipeline.build_raw(Method::GET, path, None)?;
        self.execute(out, None)
    }

    /// `DELETE` an explicit path, relative to the base URL.
    pub fn delete_raw<T: ReturnType>(&self, path: &str) -> crate::Result<T> {
        let out = self.pipeline.build_raw(Method::DELETE, path, None)?;
        self.execute(out, None)
    }

    /// `POST` an already encoded body to an explicit path.
    ///
    /// # Errors
    ///
    /// Besides the errors of the typed calls, this fails with an encode
    /// error if a reader body cannot be read.
    pub fn post_raw<T, B>(&self, path: &str, body: B) -> crate::Result<T>
    where
        T: ReturnType,
        B: Into<Body>,
    {
        self.raw_with_body(Method::POST, path, body.into())
    }

    /// `PUT` an already encoded body to an explicit path.
    pub fn put_raw<T, B>(&self, path: &str, body: B) -> crate::Result<T>
    where
        T: ReturnType,
        B: Into<Body>,
    {
        self.raw_with_body(Method::PUT, path, body.into())
    }

    /// `PATCH` an already encoded body to an explicit path.
    pub fn patch_raw<T, B>(&self, path: &str, body: B) -> crate::Result<T>
    where
        T: ReturnType,
        B: Into<Body>,
    {
        self.raw_with_body(Method::PATCH, path, body.into())
    }

    /// Call an operation with `GET` and return the raw reply.
    pub fn get_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::GET, request)
    }

    /// Call an operation with `POST` and return the raw reply.
    pub fn post_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::POST, request)
    }

    /// Call an operation with `PUT` and return the raw reply.
    pub fn put_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::PUT, request)
    }

    /// Call an operation with `DELETE` and return the raw reply.
    pub fn delete_reply<R: Operation>(&self, request: &R) -> crate::Result<Reply> {
        self.reply(Method::DELETE, request)
    }

    /// Call an operation with any verb and return the raw reply.
    ///
    /// A reply with an error status is still an error, and a results
    /// filter answering the call is a filter error.
    pub fn reply<R: Operation>(&self, method: Method, request: &R) -> crate::Result<Reply> {
        let out = self.pipeline.build_typed(method, request)?;
        self.execute_reply(out, Some(request as &(dyn Any + Send + Sync)))
    }

    /// `POST` an already encoded body to an explicit path and return the
    /// raw reply.
    pub fn post_raw_reply<B: Into<Body>>(&self, path: &str, body: B) -> crate::Result<Reply> {
        self.raw_reply(Method::POST, path, Some(body.into()))
    }

    /// Call an explicit path with any verb and return the raw reply.
    ///
    /// # Errors
    ///
    /// Fails like [`Client::reply`], and with an encode error if a reader
    /// body cannot be read.
    pub fn raw_reply(&self, method: Method, path: &str, body: Option<Body>) -> crate::Result<Reply> {
        let body = body
            .map(Body::into_async)
            .transpose()
            .map_err(crate::error::encode)?;
        let out = self.pipeline.build_raw(method, path, body)?;
        self.execute_reply(out, None)
    }

    /// The path, relative to the base URL, a request is sent to.
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

    fn typed<R: Operation>(&self, method: Method, request: &R) -> crate::Result<R::Response> {
        let out = self.pipeline.build_typed(method, request)?;
        self.execute(out, Some(request as &(dyn Any + Send + Sync)))
    }

    fn raw_with_body<T: ReturnType>(&self, method: Method, path: &str, body: Body) -> crate::Result<T> {
        let body = body.into_async().map_err(crate::error::encode)?;
        let out = self.pipeline.build_raw(method, path, Some(body))?;
        self.execute(out, None)
    }

    fn execute<T: ReturnType>(
        &self,
        mut out: Outgoing,
        request: Option<&(dyn Any + Send + Sync)>,
    ) -> crate::Result<T> {
        self.enter(out.url())?;
        let call = Call::new(
            out.method().clone(),
            out.url().clone(),
            ResponseType::of::<T>(),
            request,
        );
        if let Some(cached) = self.pipeline.prepare::<T>(&mut out, &call)? {
            return Ok(cached);
        }

        let url = out.url().clone();
        let (head, body) = self.inner.run(self.pipeline.exchange(out), &url)?;
        self.pipeline.finish(head, body, &call)
    }

    fn execute_reply(
        &self,
        mut out: Outgoing,
        request: Option<&(dyn Any + Send + Sync)>,
    ) -> crate::Result<Reply> {
        self.enter(out.url())?;
        let call = Call::new(
            out.method().clone(),
            out.url().clone(),
            ResponseType::raw_reply(),
            request,
        );
        self.pipeline.prepare_reply(&mut out, &call)?;

        let timeout = self.pipeline.timeout_for(&out);
        let url = out.url().clone();
        let reply = self.inner.run(self.pipeline.exchange_reply(out), &url)?;
        let reply = self.pipeline.finish_reply(reply, &call)?;
        Ok(Reply::new(
            reply,
            timeout,
            KeepCoreThreadAlive {
                _client: self.inner.inner.clone(),
            },
        ))
    }

    fn enter(&self, url: &Url) -> crate::Result<()> {
        wait::enter().map_err(|_| crate::error::blocking_in_async().with_url(url.clone()))
    }
}

impl<C> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

type ThreadSender = mpsc::UnboundedSender<Job>;

#[derive(Clone)]
struct ClientHandle {
    inner: Arc<InnerClientHandle>,
}

struct InnerClientHandle {
    tx: Option<ThreadSender>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for InnerClientHandle {
    fn drop(&mut self) {
        let id = self.thread.as_ref().map(|h| h.thread().id());

        trace!("closing runtime thread ({:?})", id);
        self.tx.take();
        trace!("signaled close for runtime thread ({:?})", id);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        trace!("closed runtime thread ({:?})", id);
    }
}

impl ClientHandle {
    fn new() -> crate::Result<ClientHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let (spawn_tx, spawn_rx) = oneshot::channel::<crate::Result<()>>();
        let handle = thread::Builder::new()
            .name("service-client-internal-sync-runtime".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(crate::error::builder)
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        if let Err(e) = spawn_tx.send(Err(e)) {
                            error!("Failed to communicate runtime creation failure: {e:?}");
                        }
                        return;
                    }
                };

                if spawn_tx.send(Ok(())).is_err() {
                    return;
                }

                let f = async move {
                    while let Some(job) = rx.recv().await {
                        tokio::spawn(job);
                    }
                    trace!("({:?}) Receiver is shutdown", thread::current().id());
                };

                trace!("({:?}) start runtime::block_on", thread::current().id());
                rt.block_on(f);
                trace!("({:?}) end runtime::block_on", thread::current().id());
                drop(rt);
                trace!("({:?}) finished", thread::current().id());
            })
            .map_err(crate::error::builder)?;

        // Wait for the runtime thread to start up...
        match wait::timeout(spawn_rx, None) {
            Ok(Ok(())) => (),
            Ok(Err(err)) => return Err(err),
            Err(wait::Waited::Inner(e)) => return Err(crate::error::builder(e)),
            Err(wait::Waited::Executor(e)) => return Err(crate::error::builder(e)),
            Err(wait::Waited::TimedOut(e)) => return Err(crate::error::builder(e)),
        }

        let inner_handle = Arc::new(InnerClientHandle {
            tx: Some(tx),
            thread: Some(handle),
        });

        Ok(ClientHandle {
            inner: inner_handle,
        })
    }

    /// Drives `fut` on the runtime thread and parks until it resolves.
    ///
    /// Timeouts are enforced by `fut` itself.
    fn run<F, T>(&self, fut: F, url: &Url) -> crate::Result<T>
    where
        F: Future<Output = crate::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let mut fut = Box::pin(fut);

        let job = futures_util::future::poll_fn(move |cx| {
            let canceled = match tx.as_mut() {
                Some(tx) => tx.poll_closed(cx).is_ready(),
                None => return Poll::Ready(()),
            };
            if canceled {
                trace!("response receiver is canceled");
                return Poll::Ready(());
            }

            let result = match fut.as_mut().poll(cx) {
                Poll::Ready(result) => result,
                Poll::Pending => return Poll::Pending,
            };
            if let Some(tx) = tx.take() {
                let _ = tx.send(result);
            }
            Poll::Ready(())
        });

        let sent = match self.inner.tx {
            Some(ref sender) => sender.send(Box::pin(job)).is_ok(),
            None => false,
        };
        if !sent {
            return Err(crate::error::transport(RuntimeGone).with_url(url.clone()));
        }

        match wait::timeout(rx, None) {
            Ok(res) => res,
            Err(wait::Waited::Inner(_canceled)) => {
                Err(crate::error::transport(RuntimeGone).with_url(url.clone()))
            }
            Err(wait::Waited::Executor(e)) => Err(crate::error::transport(e).with_url(url.clone())),
            Err(wait::Waited::TimedOut(e)) => Err(crate::error::transport(e).with_url(url.clone())),
        }
    }
}

#[derive(Clone, Copy)]
struct Timeout(Option<Duration>);

impl Default for Timeout {
    fn default() -> Timeout {
        // default mentioned in ClientBuilder::timeout() doc comment
        Timeout(Some(Duration::from_secs(30)))
    }
}

pub(crate) struct KeepCoreThreadAlive {
    _client: Arc<InnerClientHandle>,
}

#[derive(Debug)]
struct RuntimeGone;

impl fmt::Display for RuntimeGone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("runtime thread exited")
    }
}

impl std::error::Error for RuntimeGone {}
