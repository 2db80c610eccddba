//! Driver for WiFi coprocessors speaking the ESP8285/ESP8266 AT command set
//! over a serial link.
//!
//! The driver turns the textual command/response protocol into a network API
//! for a host microcontroller: station and access point management, network
//! scanning, and up to five concurrent TCP/UDP/TLS links multiplexed over the
//! single serial channel. Unsolicited notifications interleaved with command
//! replies are parsed out of the same byte stream and applied to the link
//! table as they arrive.
//!
//! Entry point is [adapter::Adapter], generic over a [transport::SerialLink]
//! and a [fugit_timer::Timer] used for deadline measurement. All operations
//! are synchronous, bounded by an explicit deadline and return a tagged
//! outcome; the protocol is half-duplex at the command layer, so the driver
//! runs one operation to completion at a time.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod adapter;
pub(crate) mod commands;
pub mod links;
pub(crate) mod parser;
pub mod transport;
pub mod wifi;

#[cfg(test)]
mod tests;
