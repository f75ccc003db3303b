//! # Subnegotiation Handlers
//!
//! One module per option with subnegotiation traffic:
//!
//! - `ttype`: TERMINAL-TYPE cycling (RFC 1091)
//! - `naws`: window size reports (RFC 1073)
//! - `tspeed`: terminal speed (RFC 1079)
//! - `environ`: environment variables (RFC 1572)
//! - `linemode`: MODE and MODE ACK (RFC 1184)
//!
//! The dispatcher routes a completed subnegotiation payload (option code
//! first, embedded IAC pairs already collapsed by the framer) to its
//! handler and returns fully framed reply bytes ready for the socket.

pub mod environ;
pub mod linemode;
pub mod naws;
pub mod tspeed;
pub mod ttype;

pub use environ::EnvironOption;
pub use linemode::LinemodeOption;
pub use naws::WindowSize;
pub use tspeed::TerminalSpeedOption;
pub use ttype::TerminalTypeOption;

use crate::protocol::{Command, IAC, opt};

/// Wrap a subnegotiation payload in `IAC SB ... IAC SE`, doubling any IAC
/// bytes inside the payload (RFC 855).
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(IAC);
    out.push(Command::Sb.to_byte());
    for &byte in payload {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out.push(IAC);
    out.push(Command::Se.to_byte());
    out
}

/// Effect of one dispatched subnegotiation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Handled {
    /// Framed reply to send, if the option calls for one.
    pub reply: Option<Vec<u8>>,
    /// LINEMODE MODE changed the local-edit bit; the session records it
    /// in the option registry.
    pub linemode_edit: Option<bool>,
}

/// Routes subnegotiation payloads to the per-option handlers.
#[derive(Debug, Clone)]
pub struct SubnegotiationDispatcher {
    pub ttype: TerminalTypeOption,
    pub tspeed: TerminalSpeedOption,
    pub environ: EnvironOption,
    pub linemode: LinemodeOption,
}

impl SubnegotiationDispatcher {
    pub fn new(speed: &str) -> Self {
        Self {
            ttype: TerminalTypeOption::new(),
            tspeed: TerminalSpeedOption::new(speed),
            environ: EnvironOption::from_process_env(),
            linemode: LinemodeOption::new(),
        }
    }

    /// Handle one completed subnegotiation. Payloads for options without
    /// a handler (or too short to carry a request) are ignored.
    pub fn dispatch(&mut self, payload: &[u8]) -> Handled {
        let Some(&option) = payload.first() else {
            return Handled::default();
        };
        match option {
            opt::TTYPE => Handled {
                reply: self.ttype.handle(&payload[1..]).map(|p| frame(&p)),
                linemode_edit: None,
            },
            opt::TSPEED => Handled {
                reply: self.tspeed.handle(&payload[1..]).map(|p| frame(&p)),
                linemode_edit: None,
            },
            opt::ENVIRON => Handled {
                reply: self.environ.handle(&payload[1..]).map(|p| frame(&p)),
                linemode_edit: None,
            },
            opt::LINEMODE => {
                let outcome = self.linemode.handle(&payload[1..]);
                Handled {
                    reply: outcome.reply.map(|p| frame(&p)),
                    linemode_edit: outcome.edit,
                }
            }
            _ => Handled::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_escapes_iac_in_payload() {
        let framed = frame(&[24, 0, 0xFF, 0x41]);
        assert_eq!(framed, vec![255, 250, 24, 0, 255, 255, 0x41, 255, 240]);
    }

    #[test]
    fn dispatch_routes_ttype_send() {
        let mut dispatcher = SubnegotiationDispatcher::new("38400,38400");
        let handled = dispatcher.dispatch(&[24, 1]);
        let reply = handled.reply.expect("TTYPE SEND must be answered");
        // IAC SB TTYPE IS "XTERM" IAC SE
        assert_eq!(&reply[..4], &[255, 250, 24, 0]);
        assert_eq!(&reply[4..reply.len() - 2], b"XTERM");
    }

    #[test]
    fn dispatch_ignores_unknown_option() {
        let mut dispatcher = SubnegotiationDispatcher::new("38400,38400");
        assert_eq!(dispatcher.dispatch(&[99, 1, 2, 3]), Handled::default());
        assert_eq!(dispatcher.dispatch(&[]), Handled::default());
    }
}
