#![deny(missing_docs)]
//! # switchboard
//!
//! An event-driven session and dispatch core for a TCP server, built on
//! top of [mio](https://crates.io/crates/mio). A single reactor thread
//! owns a registry of sessions and drives accept/read/write/response
//! dispatch; decoding and request handling run on a worker pool behind
//! a `crossbeam`-backed submission queue, with a `running` flag gating
//! any destructive transition that could race the two sides.
#[macro_use] extern crate log;
             extern crate mio;
             extern crate net2;

pub mod buffer;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod handler;
mod listen;
mod message;
mod reactor;
mod registry;
mod session;
mod sid;
mod sync;
mod timers;
mod transmit;
mod worker;

// Pub uses
pub use buffer::Buffer;
pub use config::ReactorConfig;
pub use decoder::{DecodeStatus, Decoder};
pub use handler::{Handler, Request};
pub use message::{Message, Response};
pub use reactor::Reactor;
pub use sid::{Sid, SYSTEM_SID};

// Reexports
pub use mio::{Event, Events, Evented, Poll, Ready, Token};
