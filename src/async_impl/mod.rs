pub use self::client::{Client, ClientBuilder};

pub mod client;
