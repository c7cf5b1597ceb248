//! HTTP surface: the rate limiting gate and the server that hosts it.

mod gate;
mod server;

pub use gate::{client_ip, enforce, GateState};
pub use server::{router, HttpServer};
