mod crypto_service;
mod proxy_h1;
mod proxy_h2;
mod proxy_main;
mod socket;

pub use crypto_service::ServerCrypto;
pub use proxy_main::{FrontDoor, Proxy, ProxyBuilder, ProxyBuilderError};
