pub mod chat_store;
pub mod client;
pub mod config;
pub mod escape_filter;
pub mod invoker;
pub mod quoting;
pub mod session;
