//! # Terminal Speed Option (RFC 1079)
//!
//! Answers `SEND` with `IS <transmit>,<receive>`. The speed is advisory
//! on a TCP transport; the configured string is reported as-is.

use crate::protocol::{SUBNEG_IS, SUBNEG_SEND, opt};

#[derive(Debug, Clone)]
pub struct TerminalSpeedOption {
    speed: String,
}

impl TerminalSpeedOption {
    pub fn new(speed: &str) -> Self {
        Self {
            speed: speed.to_string(),
        }
    }

    pub fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request.first() != Some(&SUBNEG_SEND) {
            return None;
        }
        let mut reply = Vec::with_capacity(2 + self.speed.len());
        reply.push(opt::TSPEED);
        reply.push(SUBNEG_IS);
        reply.extend_from_slice(self.speed.as_bytes());
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_answered_with_configured_speed() {
        let mut tspeed = TerminalSpeedOption::new("38400,38400");
        let reply = tspeed.handle(&[SUBNEG_SEND]).unwrap();
        assert_eq!(reply[0], opt::TSPEED);
        assert_eq!(reply[1], SUBNEG_IS);
        assert_eq!(&reply[2..], b"38400,38400");
    }

    #[test]
    fn non_send_ignored() {
        let mut tspeed = TerminalSpeedOption::new("9600,9600");
        assert_eq!(tspeed.handle(&[SUBNEG_IS]), None);
    }
}
