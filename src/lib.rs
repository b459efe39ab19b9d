//! oscope - Send, receive and snoop OSC messages over UDP
//!
//! The library holds everything the `oscope` binary is built from:
//! - `protocol`: the OSC value model and binary codec
//! - `lexer`: the typed line syntax used at the talk prompt
//! - `network`: UDP listener, talker and relay
//! - `display`: console rendering
//! - `config`: configuration file handling

pub mod config;
pub mod display;
pub mod lexer;
pub mod network;
pub mod protocol;
