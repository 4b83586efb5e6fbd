//! FBP protocol command types and runtime dispatch for weft.
//!
//! The control plane in front of a weft runtime speaks a JSON message
//! protocol whose graph commands map one-to-one onto the mutation API of
//! [`weft_core::graph::Graph`]. This crate owns the typed command set
//! ([`commands::Command`]) and the runtime object that applies commands and
//! carries the session identity ([`runtime::Runtime`]). The transport
//! itself (a websocket server, typically) lives with the embedder.
#![deny(missing_docs)]

pub mod commands;
pub mod runtime;
