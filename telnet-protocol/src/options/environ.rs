//! # Environment Option (RFC 1572)
//!
//! Answers `SEND` with `IS` carrying VAR/VALUE frames for the well-known
//! variables present in the process environment. Only USER and DISPLAY
//! are offered; values are length-capped so a hostile environment cannot
//! inflate the reply.

use crate::protocol::{SUBNEG_IS, SUBNEG_SEND, env, opt};

/// Longest variable value sent on the wire.
const MAX_VALUE_LEN: usize = 63;

const OFFERED: [&str; 2] = ["USER", "DISPLAY"];

#[derive(Debug, Clone, Default)]
pub struct EnvironOption {
    vars: Vec<(String, String)>,
}

impl EnvironOption {
    /// Collect the offered variables from the process environment.
    pub fn from_process_env() -> Self {
        let vars = OFFERED
            .iter()
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|value| !value.is_empty() && value.len() <= MAX_VALUE_LEN)
                    .map(|value| (name.to_string(), value))
            })
            .collect();
        Self { vars }
    }

    /// Fixed variable set, for tests.
    pub fn with_vars(vars: Vec<(String, String)>) -> Self {
        Self { vars }
    }

    pub fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request.first() != Some(&SUBNEG_SEND) {
            return None;
        }
        if self.vars.is_empty() {
            return None;
        }
        let mut reply = vec![opt::ENVIRON, SUBNEG_IS];
        for (name, value) in &self.vars {
            reply.push(env::VAR);
            reply.extend_from_slice(name.as_bytes());
            reply.push(env::VALUE);
            reply.extend_from_slice(value.as_bytes());
        }
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_answered_with_var_value_frames() {
        let mut environ = EnvironOption::with_vars(vec![
            ("USER".to_string(), "kim".to_string()),
            ("DISPLAY".to_string(), ":0".to_string()),
        ]);
        let reply = environ.handle(&[SUBNEG_SEND]).unwrap();
        let mut expected = vec![opt::ENVIRON, SUBNEG_IS];
        expected.push(env::VAR);
        expected.extend_from_slice(b"USER");
        expected.push(env::VALUE);
        expected.extend_from_slice(b"kim");
        expected.push(env::VAR);
        expected.extend_from_slice(b"DISPLAY");
        expected.push(env::VALUE);
        expected.extend_from_slice(b":0");
        assert_eq!(reply, expected);
    }

    #[test]
    fn empty_environment_stays_silent() {
        let mut environ = EnvironOption::with_vars(Vec::new());
        assert_eq!(environ.handle(&[SUBNEG_SEND]), None);
    }

    #[test]
    fn non_send_ignored() {
        let mut environ =
            EnvironOption::with_vars(vec![("USER".to_string(), "kim".to_string())]);
        assert_eq!(environ.handle(&[SUBNEG_IS]), None);
    }
}
