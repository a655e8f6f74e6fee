//! English/Vietnamese dictionary served over a line-oriented TCP protocol.
//!
//! Every request and reply is one UTF-8 line of `|`-separated fields. Each
//! module owns one piece of the system:
//!
//! - [`word`] defines the seven-field dictionary record and its natural key.
//! - [`codec`] encodes and decodes request and reply lines.
//! - [`server`] accepts TCP connections and runs one session per client,
//!   routing commands to a [`store::LookupStore`].
//! - [`store`] holds the lookup contract and the in-memory store.
//! - [`client`] keeps one shared connection and serializes round trips.
//! - [`activity`] records what clients searched for or changed.
//! - [`cli`] and [`console`] drive the binary's server and terminal modes.
//! - [`error`] collects the error types shared by the layers above.
//!
//! Integration tests use this crate directly to exercise the server over
//! real sockets.

pub mod activity;
pub mod cli;
pub mod client;
pub mod codec;
pub mod console;
pub mod error;
pub mod server;
pub mod store;
pub mod word;
