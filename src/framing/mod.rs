//! Delimiter framing over byte streams
//!
//! A connection is split into a read half driven by [`receive_loop`] and a
//! write half owned by a writer task reachable through [`MessageSender`].
//! Both use [`DelimiterCodec`] to turn bytes into messages and back.

pub mod channel;
pub mod codec;

pub use channel::{CLOSE_GRACE, LoopExit, MessageSender, receive_loop, spawn_writer};
pub use codec::{DEFAULT_MAX_LENGTH, DelimiterCodec};
