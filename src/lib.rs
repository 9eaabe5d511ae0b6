#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # service-client
//!
//! The `service-client` crate provides a typed client for message-based
//! HTTP services: every call sends one request value and receives one
//! response value.
//!
//! - Typed requests through the [`Operation`] trait
//! - Async and [blocking](blocking) clients with the same behavior
//! - A filter chain around each call, including a results cache hook
//! - Raw calls with explicit paths and bodies, or returning the raw reply
//! - Pluggable [codecs](codec) and [transports](Transport)
//!
//! ## Defining an operation
//!
//! A request type names the operation and the type its reply decodes into.
//! By default, it is sent to `{format}/reply/{NAME}` relative to the
//! client's base URL.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use service_client::Operation;
//!
//! #[derive(Serialize)]
//! #[serde(rename_all = "camelCase")]
//! struct GetCustomer {
//!     customer_id: i32,
//! }
//!
//! #[derive(Clone, Debug, Deserialize)]
//! struct GetCustomerResponse {
//!     customer: Customer,
//! }
//!
//! #[derive(Clone, Debug, Deserialize)]
//! struct Customer {
//!     id: i32,
//! }
//!
//! impl Operation for GetCustomer {
//!     type Response = GetCustomerResponse;
//!     const NAME: &'static str = "GetCustomer";
//! }
//! ```
//!
//! ## Making calls
//!
//! `GET` and `DELETE` send the request's fields as the query string,
//! `POST`, `PUT` and `PATCH` send the encoded request as the body.
//!
//! ```rust,no_run
//! # use serde::{Deserialize, Serialize};
//! # use service_client::Operation;
//! # #[derive(Serialize)]
//! # #[serde(rename_all = "camelCase")]
//! # struct GetCustomer { customer_id: i32 }
//! # #[derive(Clone, Debug, Deserialize)]
//! # struct GetCustomerResponse {}
//! # impl Operation for GetCustomer {
//! #     type Response = GetCustomerResponse;
//! #     const NAME: &'static str = "GetCustomer";
//! # }
//! # async fn run() -> Result<(), service_client::Error> {
//! let client = service_client::Client::new("http://localhost:1337/")?;
//!
//! // GET http://localhost:1337/json/reply/GetCustomer?customerId=5
//! let res = client.get(&GetCustomer { customer_id: 5 }).await?;
//! println!("{res:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every failure reaches the caller as an [`Error`]. A reply with an error
//! status becomes an error carrying the status code, the raw body and,
//! when the service sent one, the structured [`ResponseStatus`].
//!
//! ## Filters
//!
//! See the [`filter`] module for the hooks run around each call.
//!
//! ## Optional Features
//!
//! - **blocking** *(enabled by default)*: Provides the [blocking][] client API.

pub use http::header;
pub use http::Method;
pub use http::StatusCode;
pub use url::Url;

pub use self::async_impl::{Client, ClientBuilder};
pub use self::body::Body;
pub use self::error::{BoxError, Error, FieldError, FilterStage, ResponseStatus, Result};
pub use self::into_url::IntoUrl;
pub use self::reply::{Reply, ReplyHead};
pub use self::request::{reply_path, Operation, Outgoing, ReturnType};
pub use self::transport::{HttpTransport, Pending, Transport};

mod async_impl;
#[cfg(feature = "blocking")]
#[cfg_attr(docsrs, doc(cfg(feature = "blocking")))]
pub mod blocking;
mod body;
pub mod codec;
mod config;
pub mod delay;
mod error;
pub mod filter;
mod into_url;
mod pipeline;
mod reply;
mod request;
mod transport;

fn _assert_impls() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    fn assert_clone<T: Clone>() {}

    assert_send::<Client>();
    assert_sync::<Client>();
    assert_clone::<Client>();

    assert_send::<Error>();
    assert_sync::<Error>();

    assert_send::<Reply>();
    assert_send::<delay::Completion>();
    assert_sync::<delay::Completion>();

    #[cfg(feature = "blocking")]
    {
        assert_send::<blocking::Client>();
        assert_sync::<blocking::Client>();
        assert_send::<blocking::Reply>();
    }
}
