//! HTTP/1.x plumbing for the echo server
//!
//! Requests are read from a [`Connection`], answered by [`serve_echo`]
//! through a [`ResponseWriter`], and written back by [`ConnResponse`].

pub mod chunked;
pub mod client;
pub mod handler;
pub mod request;
pub mod response;


pub use client::{ClientRequest, ClientResponse, HttpEchoClient};
pub use handler::serve_echo;
pub use request::{Connection, EchoRequest, RequestError};
pub use response::{
    ConnResponse, Flusher, ResponseRecorder, ResponseWriter, write_error, write_plain_response,
};
