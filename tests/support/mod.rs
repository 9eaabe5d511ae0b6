#![allow(dead_code)]

pub mod canned;
pub mod server;
pub mod services;

pub static DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
