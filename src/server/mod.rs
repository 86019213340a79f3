// HTTP surface of the proxy.

pub mod handler;
