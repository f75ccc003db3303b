//! # Telnet Protocol Engine
//!
//! Client-side Telnet protocol machinery as defined in:
//! - RFC 854: Telnet Protocol Specification
//! - RFC 855: Telnet Option Specifications
//! - Option RFCs: 856 (BINARY), 857 (ECHO), 858 (SGA), 1073 (NAWS),
//!   1079 (TSPEED), 1091 (TERMINAL-TYPE), 1184 (LINEMODE), 1572 (ENVIRON)
//!
//! The crate is transport-agnostic: it turns byte slices into clean data
//! plus control events and produces reply bytes, but never touches a
//! socket. The pieces:
//!
//! - `protocol`: command and option constants and types
//! - `parser`: the stream framer (IAC sequences, CR disambiguation)
//! - `negotiation`: option registry, mode projections, RFC 855
//!   state-change negotiator
//! - `codec`: binary-mode IAC escape and unescape
//! - `options`: subnegotiation handlers and framing

pub mod codec;
pub mod negotiation;
pub mod options;
pub mod parser;
pub mod protocol;

pub use codec::{Unescaper, UnescapeError, escape};
pub use negotiation::{Modes, Negotiator, OptionRegistry, OptionSnapshot, Outcome};
pub use options::{SubnegotiationDispatcher, WindowSize, frame};
pub use parser::{Framer, MAX_SUBNEG_LEN, Parsed};
pub use protocol::{Command, IAC, TelnetEvent, negotiation_bytes, opt};
