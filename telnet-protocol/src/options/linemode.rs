//! # Linemode Option (RFC 1184)
//!
//! Only the MODE subnegotiation matters to this client: the EDIT bit
//! decides whether the session buffers lines locally, and a mode carrying
//! the ACK bit is echoed back for synchronization. FORWARDMASK and SLC
//! are acknowledged by silence.

use crate::protocol::{linemode, opt};

/// Result of a LINEMODE subnegotiation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinemodeOutcome {
    /// Unframed reply payload (MODE ACK echo) if one is owed.
    pub reply: Option<Vec<u8>>,
    /// New local-edit setting when a MODE was processed.
    pub edit: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct LinemodeOption {
    edit: bool,
}

impl LinemodeOption {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edit_enabled(&self) -> bool {
        self.edit
    }

    pub fn handle(&mut self, request: &[u8]) -> LinemodeOutcome {
        if request.len() < 2 || request[0] != linemode::MODE {
            // FORWARDMASK / SLC / truncated payloads
            return LinemodeOutcome::default();
        }
        let mode = request[1];
        self.edit = mode & linemode::MODE_EDIT != 0;

        let reply = if mode & linemode::MODE_ACK != 0 {
            Some(vec![opt::LINEMODE, linemode::MODE, mode])
        } else {
            None
        };
        LinemodeOutcome {
            reply,
            edit: Some(self.edit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_records_edit_bit() {
        let mut lm = LinemodeOption::new();
        let outcome = lm.handle(&[linemode::MODE, linemode::MODE_EDIT]);
        assert_eq!(outcome.edit, Some(true));
        assert_eq!(outcome.reply, None);
        assert!(lm.edit_enabled());

        let outcome = lm.handle(&[linemode::MODE, 0]);
        assert_eq!(outcome.edit, Some(false));
        assert!(!lm.edit_enabled());
    }

    #[test]
    fn mode_with_ack_echoed_back() {
        let mut lm = LinemodeOption::new();
        let mode = linemode::MODE_EDIT | linemode::MODE_ACK;
        let outcome = lm.handle(&[linemode::MODE, mode]);
        assert_eq!(outcome.reply, Some(vec![opt::LINEMODE, linemode::MODE, mode]));
        assert_eq!(outcome.edit, Some(true));
    }

    #[test]
    fn forwardmask_and_slc_ignored() {
        let mut lm = LinemodeOption::new();
        assert_eq!(lm.handle(&[linemode::FORWARDMASK, 0xFF]), LinemodeOutcome::default());
        assert_eq!(lm.handle(&[linemode::SLC, 1, 2, 3]), LinemodeOutcome::default());
        assert_eq!(lm.handle(&[]), LinemodeOutcome::default());
    }
}
