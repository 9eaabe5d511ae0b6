//! A blocking Client API.
//!
//! The blocking `Client` makes the same calls as the async
//! [`Client`](crate::Client), but parks the current thread until each call
//! completes. Filters run on the calling thread; the transport runs on a
//! runtime thread owned by the client.
//!
//! Replies are returned in full, decoded into the operation's response
//! type, unless a `*_reply` method is used. Those return a [`Reply`] whose
//! body can be read through `std::io::Read`.
//!
//! # Optional
//!
//! This requires the optional `blocking` feature to be enabled.
//!
//! # Making a call
//!
//! ```no_run
//! # use serde::{Deserialize, Serialize};
//! # use service_client::Operation;
//! # #[derive(Serialize)]
//! # struct Hello { name: String }
//! # #[derive(Clone, Deserialize)]
//! # struct HelloResponse { result: String }
//! # impl Operation for Hello {
//! #     type Response = HelloResponse;
//! #     const NAME: &'static str = "Hello";
//! # }
//! # fn run() -> Result<(), service_client::Error> {
//! let client = service_client::blocking::Client::new("http://localhost:1337/")?;
//! let res = client.get(&Hello { name: "World".into() })?;
//! println!("{}", res.result);
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod reply;
pub(crate) mod wait;

pub use self::body::Body;
pub use self::client::{Client, ClientBuilder};
pub use self::reply::Reply;
