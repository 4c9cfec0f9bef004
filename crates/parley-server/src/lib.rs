//! # parley-server
//!
//! Real-time delivery of encrypted direct-chat messages over WebSocket.
//! Clients authenticate once at handshake time with a bearer token, then
//! exchange JSON event frames; message text is encrypted before it reaches
//! the store and decrypted again before it is pushed to chat members.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod service;

#[cfg(test)]
mod test_support;
