//! Minimal HTTP layer on top of the message server
//!
//! [`HttpServer`] answers GET requests with a handler-produced body and closes
//! the connection after every response. The [`client`] functions perform
//! plain GET, POST and DELETE requests against such servers (or any HTTP/1.1
//! server) and pull JSON objects out of replies.

pub mod client;
pub mod config;
pub mod request;
pub mod response;
pub mod server;


pub use client::{HttpReply, delete, extract_json, get, post};
pub use config::HttpConfig;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use server::{BoxError, HttpServer};
