//! Lineterm: an interactive telnet client with in-process Kermit file
//! transfer and ZMODEM/XMODEM/YMODEM auto-detection.

pub mod config;
pub mod detect;
pub mod errors;
pub mod events;
pub mod kermit;
pub mod relay;
pub mod session;
pub mod transfer;

pub use config::Config;
pub use errors::{ClientError, ClientResult};
pub use session::{Connection, Mode, Session};
