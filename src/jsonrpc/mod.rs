//! JSON-RPC 2.0 protocol engine: wire types, method codecs, id generation
//! and the transport-independent server.

pub mod codec;
pub mod id;
pub mod message;
pub mod server;
