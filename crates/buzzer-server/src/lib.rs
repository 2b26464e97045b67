// Library root: re-exports all modules so integration tests and the binary
// can access the server's public API.

pub mod app;
pub mod clients;
pub mod config;
pub mod ws_server;
