//! Process wiring for the `mentor` binary: configuration, logging, the HTTP
//! response generator, the known-counterparty file, the inbound poll loop and
//! the operator control surface.

pub mod bootstrap;
pub mod cli_args;
pub mod control_server;
pub mod http_generator;
pub mod inbound_loop;
pub mod known_counterparty_store;

#[cfg(test)]
mod test_support;

pub use bootstrap::*;
pub use cli_args::*;
pub use control_server::*;
pub use http_generator::*;
pub use inbound_loop::*;
pub use known_counterparty_store::*;
