//! Passive and deauth-assisted capture of WPA handshakes and PMKIDs from a
//! monitor-mode 802.11 interface.

pub mod capture;
pub mod config;
pub mod cursor;
pub mod deauth;
pub mod display;
pub mod error;
pub mod handshake;
pub mod interface;
pub mod mac;
pub mod parser;
pub mod rsn;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod writer;

pub use error::{Result, SnifferError};
