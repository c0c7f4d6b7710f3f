//! Rollcall scanner front end.
//!
//! The binary wires the sync engine to a line-oriented console: each line
//! read from stdin is one decoded QR payload, as delivered by the capture
//! layer, or one of the operator commands.

pub mod app;
pub mod console;
