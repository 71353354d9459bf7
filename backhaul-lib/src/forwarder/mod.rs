mod client;

pub use client::{ForwardRequest, HttpClient};
