//! # Telnet Protocol Constants and Types
//!
//! Core protocol definitions from:
//! - **RFC 854**: Telnet Protocol Specification
//! - **RFC 855**: Telnet Option Specifications
//!
//! ## Key Concepts
//!
//! ### IAC (Interpret As Command) - Byte 255
//! The IAC byte signals that the following bytes are a Telnet command
//! rather than data. A data byte with value 255 is escaped as IAC IAC.
//!
//! ### Command Structure
//! - Negotiation: `IAC WILL/WONT/DO/DONT <option>`
//! - Simple commands: `IAC <command>` (e.g. IAC AYT)
//! - Subnegotiation: `IAC SB <option> <parameters...> IAC SE`
//!
//! Options are kept as raw `u8` codes rather than an enum: the option
//! registry is indexed over the full 0..=255 space and must track options
//! we do not implement (to refuse them with WONT/DONT per RFC 855).

/// IAC - Interpret As Command (RFC 854, Section 4)
pub const IAC: u8 = 255;

/// Telnet commands that follow an IAC byte (RFC 854, Section 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// End of Record (RFC 885)
    Eor = 239,
    /// End of subnegotiation parameters (RFC 855)
    Se = 240,
    /// No Operation, sometimes used as keepalive
    Nop = 241,
    /// Data Mark, marks position of a Synch event
    Dm = 242,
    /// Break or Attention signal
    Brk = 243,
    /// Interrupt Process
    Ip = 244,
    /// Abort Output
    Ao = 245,
    /// Are You There, expects visible evidence of life
    Ayt = 246,
    /// Erase Character
    Ec = 247,
    /// Erase Line
    El = 248,
    /// Go Ahead (half-duplex turn marker, RFC 858 makes it obsolete)
    Ga = 249,
    /// Subnegotiation Begin (RFC 855)
    Sb = 250,
    /// Sender wants to enable an option on its side
    Will = 251,
    /// Sender refuses or disables an option on its side
    Wont = 252,
    /// Sender asks the receiver to enable an option
    Do = 253,
    /// Sender asks the receiver to disable an option
    Dont = 254,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            239 => Some(Command::Eor),
            240 => Some(Command::Se),
            241 => Some(Command::Nop),
            242 => Some(Command::Dm),
            243 => Some(Command::Brk),
            244 => Some(Command::Ip),
            245 => Some(Command::Ao),
            246 => Some(Command::Ayt),
            247 => Some(Command::Ec),
            248 => Some(Command::El),
            249 => Some(Command::Ga),
            250 => Some(Command::Sb),
            251 => Some(Command::Will),
            252 => Some(Command::Wont),
            253 => Some(Command::Do),
            254 => Some(Command::Dont),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// True for the four option-negotiation verbs.
    pub fn is_negotiation(self) -> bool {
        matches!(
            self,
            Command::Will | Command::Wont | Command::Do | Command::Dont
        )
    }
}

/// Telnet option codes (RFC assignments)
///
/// Only the codes this client negotiates or refuses by name. Anything
/// else is refused generically by code.
pub mod opt {
    /// Binary Transmission (RFC 856), 8-bit transparent mode
    pub const BINARY: u8 = 0;
    /// Echo (RFC 857)
    pub const ECHO: u8 = 1;
    /// Suppress Go Ahead (RFC 858)
    pub const SGA: u8 = 3;
    /// Status (RFC 859)
    pub const STATUS: u8 = 5;
    /// Timing Mark (RFC 860)
    pub const TIMING_MARK: u8 = 6;
    /// Terminal Type (RFC 1091)
    pub const TTYPE: u8 = 24;
    /// Negotiate About Window Size (RFC 1073)
    pub const NAWS: u8 = 31;
    /// Terminal Speed (RFC 1079)
    pub const TSPEED: u8 = 32;
    /// Remote Flow Control (RFC 1372)
    pub const LFLOW: u8 = 33;
    /// Linemode (RFC 1184)
    pub const LINEMODE: u8 = 34;
    /// Environment Option (RFC 1572; code 36 is the older assignment
    /// that classic telnetd implementations actually send)
    pub const ENVIRON: u8 = 36;

    /// Human-readable name for log lines.
    pub fn name(code: u8) -> &'static str {
        match code {
            BINARY => "BINARY",
            ECHO => "ECHO",
            SGA => "SGA",
            STATUS => "STATUS",
            TIMING_MARK => "TIMING-MARK",
            TTYPE => "TERMINAL-TYPE",
            NAWS => "NAWS",
            TSPEED => "TSPEED",
            LFLOW => "LFLOW",
            LINEMODE => "LINEMODE",
            ENVIRON => "ENVIRON",
            _ => "unknown",
        }
    }
}

/// TERMINAL-TYPE subnegotiation codes (RFC 1091), shared by TSPEED and
/// ENVIRON which reuse the same IS/SEND framing.
pub const SUBNEG_IS: u8 = 0;
pub const SUBNEG_SEND: u8 = 1;

/// ENVIRON subnegotiation field markers (RFC 1572)
pub mod env {
    pub const VAR: u8 = 0;
    pub const VALUE: u8 = 1;
    pub const ESC: u8 = 2;
    pub const USERVAR: u8 = 3;
}

/// LINEMODE subnegotiation codes (RFC 1184)
pub mod linemode {
    pub const MODE: u8 = 1;
    pub const FORWARDMASK: u8 = 2;
    pub const SLC: u8 = 3;

    /// MODE bits
    pub const MODE_EDIT: u8 = 0x01;
    pub const MODE_TRAPSIG: u8 = 0x02;
    pub const MODE_ACK: u8 = 0x04;
    pub const MODE_SOFT_TAB: u8 = 0x08;
    pub const MODE_LIT_ECHO: u8 = 0x10;
}

/// An event extracted from the inbound byte stream by the framer.
///
/// Clean data bytes are returned separately; these are the control-plane
/// occurrences a session has to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// `IAC WILL/WONT/DO/DONT <option>`
    Negotiation { command: Command, option: u8 },
    /// Complete `IAC SB ... IAC SE` payload, option code at `data[0]`,
    /// embedded IAC IAC pairs already collapsed.
    Subnegotiation { data: Vec<u8> },
    /// A simple command such as GA, NOP or AYT. AYT is the only one the
    /// session answers; the rest are log-only.
    Command(Command),
    /// `IAC <byte>` where the byte is not a known command.
    UnknownCommand(u8),
    /// A subnegotiation exceeded the scratch bound and was dropped whole.
    SubnegotiationOverflow { option: u8, len: usize },
}

/// Serialize a negotiation reply: `IAC <command> <option>`.
pub fn negotiation_bytes(command: Command, option: u8) -> [u8; 3] {
    [IAC, command.to_byte(), option]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_byte_round_trip() {
        assert_eq!(Command::from_byte(251), Some(Command::Will));
        assert_eq!(Command::from_byte(252), Some(Command::Wont));
        assert_eq!(Command::from_byte(253), Some(Command::Do));
        assert_eq!(Command::from_byte(254), Some(Command::Dont));
        assert_eq!(Command::from_byte(240), Some(Command::Se));
        assert_eq!(Command::from_byte(100), None);

        assert_eq!(Command::Will.to_byte(), 251);
        assert_eq!(Command::Ayt.to_byte(), 246);
    }

    #[test]
    fn negotiation_commands() {
        assert!(Command::Will.is_negotiation());
        assert!(Command::Dont.is_negotiation());
        assert!(!Command::Sb.is_negotiation());
        assert!(!Command::Ayt.is_negotiation());
    }

    #[test]
    fn option_names() {
        assert_eq!(opt::name(opt::BINARY), "BINARY");
        assert_eq!(opt::name(opt::LINEMODE), "LINEMODE");
        assert_eq!(opt::name(200), "unknown");
    }

    #[test]
    fn negotiation_serialization() {
        assert_eq!(negotiation_bytes(Command::Do, opt::ECHO), [255, 253, 1]);
        assert_eq!(negotiation_bytes(Command::Will, opt::BINARY), [255, 251, 0]);
    }
}
