//! # Terminal Type Option (RFC 1091)
//!
//! The server asks with `IAC SB TTYPE SEND IAC SE`; each request is
//! answered with `IS <name>` for the next entry of a fixed cycle. RFC
//! 1091 has the client repeat the cycle so the server can detect the
//! wrap-around when a name repeats.

use crate::protocol::{SUBNEG_IS, SUBNEG_SEND, opt};

/// The terminal types offered, most capable first.
pub const TYPE_CYCLE: [&str; 3] = ["XTERM", "VT100", "ANSI"];

#[derive(Debug, Clone, Default)]
pub struct TerminalTypeOption {
    index: usize,
}

impl TerminalTypeOption {
    pub fn new() -> Self {
        Self::default()
    }

    /// The type the next SEND will be answered with.
    pub fn current(&self) -> &'static str {
        TYPE_CYCLE[self.index % TYPE_CYCLE.len()]
    }

    /// Handle the payload after the option code. Returns the unframed
    /// reply payload for a SEND request.
    pub fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request.first() != Some(&SUBNEG_SEND) {
            return None;
        }
        let name = self.current();
        let mut reply = Vec::with_capacity(2 + name.len());
        reply.push(opt::TTYPE);
        reply.push(SUBNEG_IS);
        reply.extend_from_slice(name.as_bytes());
        self.index = self.index.wrapping_add(1);
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_cycles_through_types_and_wraps() {
        let mut ttype = TerminalTypeOption::new();
        let names: Vec<Vec<u8>> = (0..4)
            .map(|_| ttype.handle(&[SUBNEG_SEND]).unwrap()[2..].to_vec())
            .collect();
        assert_eq!(names[0], b"XTERM");
        assert_eq!(names[1], b"VT100");
        assert_eq!(names[2], b"ANSI");
        assert_eq!(names[3], b"XTERM");
    }

    #[test]
    fn reply_is_is_framed_payload() {
        let mut ttype = TerminalTypeOption::new();
        let reply = ttype.handle(&[SUBNEG_SEND]).unwrap();
        assert_eq!(reply[0], opt::TTYPE);
        assert_eq!(reply[1], SUBNEG_IS);
    }

    #[test]
    fn non_send_ignored() {
        let mut ttype = TerminalTypeOption::new();
        assert_eq!(ttype.handle(&[SUBNEG_IS, b'X']), None);
        assert_eq!(ttype.handle(&[]), None);
        // And the cycle did not advance
        assert_eq!(ttype.current(), "XTERM");
    }
}
