//! # Option Registry and Negotiator
//!
//! Implements the option negotiation discipline of **RFC 854/855**: a
//! reply is sent only when an option's state actually changes, never as a
//! confirmation of a state already in force. That single rule is what
//! prevents the classic WILL/DO reflection loop between two compliant
//! endpoints.
//!
//! The registry tracks the raw per-option enable bits for both directions
//! and derives the handful of mode projections the rest of the client
//! reads (binary, echo, SGA, linemode). Projections are recomputed in one
//! step after any change; the framer never reads them directly.

use crate::protocol::{Command, opt};

/// Options this client is willing to enable on its own side when asked
/// with DO.
const SUPPORTED_LOCAL: &[u8] = &[
    opt::BINARY,
    opt::SGA,
    opt::TTYPE,
    opt::NAWS,
    opt::TSPEED,
    opt::ENVIRON,
    opt::LINEMODE,
];

/// Options this client accepts the remote enabling with WILL.
const SUPPORTED_REMOTE: &[u8] = &[opt::BINARY, opt::SGA, opt::ECHO];

/// Derived mode booleans, recomputed after every option change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modes {
    /// We transmit 8-bit transparent
    pub binary_local: bool,
    /// The remote transmits 8-bit transparent
    pub binary_remote: bool,
    /// We echo locally
    pub echo_local: bool,
    /// The remote echoes for us
    pub echo_remote: bool,
    pub sga_local: bool,
    pub sga_remote: bool,
    /// LINEMODE option is active on our side
    pub linemode_active: bool,
    /// LINEMODE MODE negotiated local editing (set by the subnegotiation
    /// handler, preserved across recomputation)
    pub linemode_edit: bool,
}

impl Modes {
    /// Both directions 8-bit transparent, the precondition for a file
    /// transfer.
    pub fn binary_bidirectional(&self) -> bool {
        self.binary_local && self.binary_remote
    }
}

/// Option state captured before a transfer and restored afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSnapshot {
    pub binary_local: bool,
    pub binary_remote: bool,
    pub echo_local: bool,
    pub echo_remote: bool,
    pub sga_local: bool,
    pub sga_remote: bool,
    pub linemode_active: bool,
}

/// Per-option local/remote enable bits plus the derived projections.
#[derive(Debug, Clone)]
pub struct OptionRegistry {
    local: [bool; 256],
    remote: [bool; 256],
    modes: Modes,
}

impl Default for OptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self {
            local: [false; 256],
            remote: [false; 256],
            modes: Modes::default(),
        }
    }

    pub fn local(&self, option: u8) -> bool {
        self.local[option as usize]
    }

    pub fn remote(&self, option: u8) -> bool {
        self.remote[option as usize]
    }

    pub fn set_local(&mut self, option: u8, enabled: bool) {
        self.local[option as usize] = enabled;
        self.recompute_projections();
    }

    pub fn set_remote(&mut self, option: u8, enabled: bool) {
        self.remote[option as usize] = enabled;
        self.recompute_projections();
    }

    pub fn modes(&self) -> Modes {
        self.modes
    }

    /// Record the LINEMODE MODE edit bit (owned by the subnegotiation
    /// handler, not derivable from the enable bits).
    pub fn set_linemode_edit(&mut self, edit: bool) {
        self.modes.linemode_edit = edit;
    }

    /// Rebuild every derived boolean from the enable bits. Idempotent.
    pub fn recompute_projections(&mut self) {
        let edit = self.modes.linemode_edit;
        self.modes = Modes {
            binary_local: self.local[opt::BINARY as usize],
            binary_remote: self.remote[opt::BINARY as usize],
            echo_local: self.local[opt::ECHO as usize],
            echo_remote: self.remote[opt::ECHO as usize],
            sga_local: self.local[opt::SGA as usize],
            sga_remote: self.remote[opt::SGA as usize],
            linemode_active: self.local[opt::LINEMODE as usize],
            linemode_edit: edit,
        };
    }

    /// Capture the bits a transfer will disturb.
    pub fn snapshot(&self) -> OptionSnapshot {
        OptionSnapshot {
            binary_local: self.modes.binary_local,
            binary_remote: self.modes.binary_remote,
            echo_local: self.modes.echo_local,
            echo_remote: self.modes.echo_remote,
            sga_local: self.modes.sga_local,
            sga_remote: self.modes.sga_remote,
            linemode_active: self.modes.linemode_active,
        }
    }
}

/// What a negotiation event did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Reply to put on the wire, if the state changed or the option was
    /// refused. `None` for duplicate confirmations.
    pub reply: Option<(Command, u8)>,
    /// The option is now enabled on the side the verb addressed.
    pub enabled: bool,
    /// The event flipped a bit (as opposed to confirming or refusing).
    pub state_changed: bool,
}

/// RFC 855 state-change negotiator.
///
/// Stateless by itself; all state lives in the [`OptionRegistry`] so the
/// supervisor can snapshot and restore it wholesale.
#[derive(Debug, Clone, Copy, Default)]
pub struct Negotiator;

impl Negotiator {
    pub fn new() -> Self {
        Self
    }

    /// Process one `IAC WILL/WONT/DO/DONT <option>` event.
    pub fn handle(
        &self,
        registry: &mut OptionRegistry,
        command: Command,
        option: u8,
    ) -> Outcome {
        match command {
            Command::Will => {
                if SUPPORTED_REMOTE.contains(&option) {
                    if registry.remote(option) {
                        Outcome {
                            reply: None,
                            enabled: true,
                            state_changed: false,
                        }
                    } else {
                        registry.set_remote(option, true);
                        Outcome {
                            reply: Some((Command::Do, option)),
                            enabled: true,
                            state_changed: true,
                        }
                    }
                } else {
                    Outcome {
                        reply: Some((Command::Dont, option)),
                        enabled: false,
                        state_changed: false,
                    }
                }
            }
            Command::Wont => {
                if registry.remote(option) {
                    registry.set_remote(option, false);
                    Outcome {
                        reply: Some((Command::Dont, option)),
                        enabled: false,
                        state_changed: true,
                    }
                } else {
                    Outcome {
                        reply: None,
                        enabled: false,
                        state_changed: false,
                    }
                }
            }
            Command::Do => {
                if SUPPORTED_LOCAL.contains(&option) {
                    if registry.local(option) {
                        Outcome {
                            reply: None,
                            enabled: true,
                            state_changed: false,
                        }
                    } else {
                        registry.set_local(option, true);
                        Outcome {
                            reply: Some((Command::Will, option)),
                            enabled: true,
                            state_changed: true,
                        }
                    }
                } else {
                    Outcome {
                        reply: Some((Command::Wont, option)),
                        enabled: false,
                        state_changed: false,
                    }
                }
            }
            Command::Dont => {
                if registry.local(option) {
                    registry.set_local(option, false);
                    Outcome {
                        reply: Some((Command::Wont, option)),
                        enabled: false,
                        state_changed: true,
                    }
                } else {
                    Outcome {
                        reply: None,
                        enabled: false,
                        state_changed: false,
                    }
                }
            }
            _ => Outcome {
                reply: None,
                enabled: false,
                state_changed: false,
            },
        }
    }

    /// Request bidirectional BINARY mode, setting the bits optimistically.
    ///
    /// Returns the `IAC WILL BINARY IAC DO BINARY` sequence to send. The
    /// optimistic flip mirrors what a compliant server will confirm; the
    /// supervisor's negotiation drain consumes the confirmations (or the
    /// refusals, which flip the bits back through [`handle`]).
    pub fn request_binary(&self, registry: &mut OptionRegistry) -> Vec<u8> {
        registry.set_local(opt::BINARY, true);
        registry.set_remote(opt::BINARY, true);
        let mut bytes = Vec::with_capacity(6);
        bytes.extend_from_slice(&crate::protocol::negotiation_bytes(
            Command::Will,
            opt::BINARY,
        ));
        bytes.extend_from_slice(&crate::protocol::negotiation_bytes(
            Command::Do,
            opt::BINARY,
        ));
        bytes
    }

    /// Compute the minimal verb sequence that returns the registry to a
    /// snapshot, applying each change to the registry as it is planned.
    pub fn restore(
        &self,
        registry: &mut OptionRegistry,
        saved: &OptionSnapshot,
    ) -> Vec<(Command, u8)> {
        let mut plan = Vec::new();
        let desired_local = [
            (opt::BINARY, saved.binary_local),
            (opt::ECHO, saved.echo_local),
            (opt::SGA, saved.sga_local),
            (opt::LINEMODE, saved.linemode_active),
        ];
        for (option, desired) in desired_local {
            if registry.local(option) != desired {
                registry.set_local(option, desired);
                let verb = if desired { Command::Will } else { Command::Wont };
                plan.push((verb, option));
            }
        }
        let desired_remote = [
            (opt::BINARY, saved.binary_remote),
            (opt::ECHO, saved.echo_remote),
            (opt::SGA, saved.sga_remote),
        ];
        for (option, desired) in desired_remote {
            if registry.remote(option) != desired {
                registry.set_remote(option, desired);
                let verb = if desired { Command::Do } else { Command::Dont };
                plan.push((verb, option));
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn will_supported_enables_and_replies_once() {
        let negotiator = Negotiator::new();
        let mut registry = OptionRegistry::new();

        let first = negotiator.handle(&mut registry, Command::Will, opt::ECHO);
        assert_eq!(first.reply, Some((Command::Do, opt::ECHO)));
        assert!(first.state_changed);
        assert!(registry.modes().echo_remote);

        // Duplicate WILL is a confirmation and must stay silent
        let second = negotiator.handle(&mut registry, Command::Will, opt::ECHO);
        assert_eq!(second.reply, None);
        assert!(!second.state_changed);
    }

    #[test]
    fn will_unsupported_refused() {
        let negotiator = Negotiator::new();
        let mut registry = OptionRegistry::new();
        let outcome = negotiator.handle(&mut registry, Command::Will, opt::STATUS);
        assert_eq!(outcome.reply, Some((Command::Dont, opt::STATUS)));
        assert!(!registry.remote(opt::STATUS));
    }

    #[test]
    fn do_supported_enables_local() {
        let negotiator = Negotiator::new();
        let mut registry = OptionRegistry::new();
        let outcome = negotiator.handle(&mut registry, Command::Do, opt::TTYPE);
        assert_eq!(outcome.reply, Some((Command::Will, opt::TTYPE)));
        assert!(registry.local(opt::TTYPE));
    }

    #[test]
    fn do_unsupported_refused_with_wont() {
        let negotiator = Negotiator::new();
        let mut registry = OptionRegistry::new();
        let outcome = negotiator.handle(&mut registry, Command::Do, opt::ECHO);
        assert_eq!(outcome.reply, Some((Command::Wont, opt::ECHO)));
        assert!(!registry.local(opt::ECHO));
    }

    #[test]
    fn wont_disables_only_when_enabled() {
        let negotiator = Negotiator::new();
        let mut registry = OptionRegistry::new();

        let silent = negotiator.handle(&mut registry, Command::Wont, opt::ECHO);
        assert_eq!(silent.reply, None);

        negotiator.handle(&mut registry, Command::Will, opt::ECHO);
        let disabled = negotiator.handle(&mut registry, Command::Wont, opt::ECHO);
        assert_eq!(disabled.reply, Some((Command::Dont, opt::ECHO)));
        assert!(!registry.modes().echo_remote);
    }

    #[test]
    fn projections_recompute_idempotently() {
        let mut registry = OptionRegistry::new();
        registry.set_local(opt::BINARY, true);
        registry.set_remote(opt::BINARY, true);
        registry.set_linemode_edit(true);

        let before = registry.modes();
        registry.recompute_projections();
        registry.recompute_projections();
        assert_eq!(before, registry.modes());
        assert!(registry.modes().binary_bidirectional());
        assert!(registry.modes().linemode_edit);
    }

    #[test]
    fn request_binary_is_optimistic() {
        let negotiator = Negotiator::new();
        let mut registry = OptionRegistry::new();
        let bytes = negotiator.request_binary(&mut registry);
        assert_eq!(bytes, vec![255, 251, 0, 255, 253, 0]);
        assert!(registry.modes().binary_bidirectional());
    }

    #[test]
    fn restore_issues_minimal_plan() {
        let negotiator = Negotiator::new();
        let mut registry = OptionRegistry::new();

        // Pre-transfer state: remote ECHO on, nothing else
        negotiator.handle(&mut registry, Command::Will, opt::ECHO);
        let saved = registry.snapshot();

        // Transfer forced binary on both sides
        negotiator.request_binary(&mut registry);

        let plan = negotiator.restore(&mut registry, &saved);
        assert_eq!(
            plan,
            vec![(Command::Wont, opt::BINARY), (Command::Dont, opt::BINARY)]
        );
        assert!(!registry.modes().binary_local);
        assert!(!registry.modes().binary_remote);
        assert!(registry.modes().echo_remote);

        // A second restore from the same snapshot is a no-op
        assert!(negotiator.restore(&mut registry, &saved).is_empty());
    }
}
