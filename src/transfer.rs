//! Transfer supervision: mode entry and exit around a file transfer.
//!
//! The supervisor owns the choreography the protocols themselves cannot
//! see: snapshotting option state, forcing bidirectional BINARY mode,
//! draining the negotiation exchange (and preserving any early Kermit
//! packet that arrives during it), pausing the detectors, dispatching to
//! the in-process Kermit engine or the external relay, and afterwards
//! restoring options, re-initializing detectors and flushing residual
//! bytes before the session returns to CLIENT mode.
//!
//! Cancellation is one process-wide atomic flag. The signalling side
//! only ever stores into it; the engine and relay poll it every loop.

use crate::config::TransferConfig;
use crate::errors::{ClientError, ClientResult};
use crate::events::{Protocol, TransferLog, status_line, warn_line};
use crate::kermit::{KermitEngine, TransferSummary, port::TelnetPort};
use crate::relay;
use crate::session::{Connection, Mode};

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Request transfer cancellation. Safe to call from a signal context:
/// nothing here allocates or locks.
pub fn request_cancel() {
    CANCEL_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn cancel_requested() -> bool {
    CANCEL_REQUESTED.load(Ordering::SeqCst)
}

pub fn clear_cancel() {
    CANCEL_REQUESTED.store(false, Ordering::SeqCst);
}

/// Upper bound for the early-packet queue: one long packet after IAC
/// expansion, with framing margin.
pub const PENDING_CAPACITY: usize = 8192;

/// Bytes that arrived during the BINARY negotiation drain and belong to
/// the transfer engine. The engine drains this before its first socket
/// read and never looks again.
#[derive(Debug, Clone, Default)]
pub struct PendingBytes {
    data: Vec<u8>,
}

impl PendingBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Append, refusing growth past the bound. Returns false on refusal.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if self.data.len() + bytes.len() > PENDING_CAPACITY {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let n = self.data.len().min(max);
        let rest = self.data.split_off(n);
        std::mem::replace(&mut self.data, rest)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// How the drain classified a clean chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainClass {
    /// Starts with SOH or looks like a bare Kermit header: an early
    /// packet that must be preserved.
    EarlyPacket,
    /// Countdown text, banners, prompts: discard.
    Chatter,
}

/// Early-packet heuristic for the negotiation drain: SOH up front, or a
/// plausible header (LEN printable in the short-packet range, SEQ and
/// TYPE printable).
pub fn classify_drain_data(clean: &[u8]) -> DrainClass {
    if clean.first() == Some(&0x01) {
        return DrainClass::EarlyPacket;
    }
    if clean.len() >= 4 {
        let len = clean[0];
        let seq = clean[1];
        let ptype = clean[2];
        if (35..=126).contains(&len)
            && (32..=126).contains(&seq)
            && (32..=126).contains(&ptype)
        {
            return DrainClass::EarlyPacket;
        }
    }
    DrainClass::Chatter
}

/// A transfer the console or a detector asked for.
#[derive(Debug, Clone)]
pub enum TransferRequest {
    KermitSend { path: PathBuf },
    KermitReceive,
    /// One of the modem protocols, run through an external program.
    External {
        protocol: Protocol,
        path: Option<PathBuf>,
    },
}

impl TransferRequest {
    pub fn protocol(&self) -> Protocol {
        match self {
            TransferRequest::KermitSend { .. } => Protocol::KermitSend,
            TransferRequest::KermitReceive => Protocol::KermitReceive,
            TransferRequest::External { protocol, .. } => *protocol,
        }
    }

    pub fn filename(&self) -> String {
        match self {
            TransferRequest::KermitSend { path } => path.display().to_string(),
            TransferRequest::External { path: Some(p), .. } => p.display().to_string(),
            _ => String::new(),
        }
    }
}

/// Live bookkeeping for the single active transfer.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub active: bool,
    pub protocol: Option<Protocol>,
    pub started: Instant,
    pub last_data: Instant,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub filename: String,
}

impl Default for TransferState {
    fn default() -> Self {
        Self {
            active: false,
            protocol: None,
            started: Instant::now(),
            last_data: Instant::now(),
            bytes_transferred: 0,
            total_bytes: 0,
            filename: String::new(),
        }
    }
}

impl TransferState {
    pub fn enter(&mut self, protocol: Protocol, filename: String) {
        self.active = true;
        self.protocol = Some(protocol);
        self.started = Instant::now();
        self.last_data = self.started;
        self.bytes_transferred = 0;
        self.total_bytes = 0;
        self.filename = filename;
    }

    pub fn exit(&mut self) {
        self.active = false;
        self.protocol = None;
    }

    pub fn timed_out(&self, limit: Duration) -> bool {
        self.active && self.started.elapsed() > limit
    }

    pub fn data_timed_out(&self, limit: Duration) -> bool {
        self.active && self.last_data.elapsed() > limit
    }

    pub fn touch(&mut self) {
        self.last_data = Instant::now();
    }
}

/// Drain rounds: 3 x 100 ms when BINARY has to be negotiated, 2 x 100 ms
/// when both directions were already on.
const DRAIN_ROUNDS_NEGOTIATING: u32 = 3;
const DRAIN_ROUNDS_ALREADY_BINARY: u32 = 2;
const DRAIN_ROUND_TIME: Duration = Duration::from_millis(100);

/// Post-transfer flush: short reads until the line goes quiet.
const FLUSH_ATTEMPTS: u32 = 10;
const FLUSH_PAUSE: Duration = Duration::from_millis(10);

pub struct Supervisor {
    config: TransferConfig,
    log: TransferLog,
}

impl Supervisor {
    pub fn new(config: TransferConfig, log: TransferLog) -> Self {
        Self { config, log }
    }

    /// Run one transfer to completion, entering and leaving TRANSFER
    /// mode around it. Transfer errors are returned after the restore
    /// sequence has already run; the session stays usable.
    pub fn execute(
        &self,
        conn: &mut Connection,
        request: TransferRequest,
    ) -> ClientResult<TransferSummary> {
        let protocol = request.protocol();
        status_line(&format!("Starting {}", protocol.name()));

        conn.transfer.enter(protocol, request.filename());
        let saved = conn.registry.snapshot();

        // Force 8-bit transparency, then consume the negotiation
        // exchange (or, if already transparent, any late chatter)
        let already_binary = conn.registry.modes().binary_bidirectional();
        if !already_binary {
            let bytes = conn.negotiator.request_binary(&mut conn.registry);
            conn.send_raw(&bytes)?;
        }
        self.negotiation_drain(conn, already_binary)?;

        conn.mode = Mode::Transfer;
        conn.detectors.pause();
        self.log.start(protocol, &conn.transfer.filename);

        let outcome = self.dispatch(conn, &request);

        // Exit sequence runs regardless of how the transfer ended
        let elapsed = conn.transfer.started.elapsed().as_secs_f64();
        let bytes = match &outcome {
            Ok(summary) => summary.bytes,
            Err(_) => conn.transfer.bytes_transferred,
        };
        let filename = match &outcome {
            Ok(summary) if !summary.filename.is_empty() => summary.filename.clone(),
            _ => conn.transfer.filename.clone(),
        };
        self.log
            .end(protocol, &filename, bytes, elapsed, outcome.as_ref().err());

        self.restore(conn, &saved)?;
        conn.transfer.exit();
        clear_cancel();
        conn.mode = Mode::Client;

        match &outcome {
            Ok(summary) => status_line(&format!(
                "{} complete: {} ({} bytes)",
                protocol.name(),
                summary.filename,
                summary.bytes
            )),
            Err(e) => crate::events::error_line(&format!("{} failed: {}", protocol.name(), e)),
        }
        outcome
    }

    fn dispatch(
        &self,
        conn: &mut Connection,
        request: &TransferRequest,
    ) -> ClientResult<TransferSummary> {
        match request {
            TransferRequest::KermitSend { path } => self.run_kermit(conn, Some(path.clone())),
            TransferRequest::KermitReceive => self.run_kermit(conn, None),
            TransferRequest::External { protocol, path } => {
                relay::run(conn, &self.config, *protocol, path.as_deref())
            }
        }
    }

    fn run_kermit(
        &self,
        conn: &mut Connection,
        send_path: Option<PathBuf>,
    ) -> ClientResult<TransferSummary> {
        let mut port = TelnetPort::new(
            &conn.socket,
            &mut conn.pending,
            Path::new(&self.config.download_dir),
            self.config.keep_partial,
        );
        if let Some(path) = &send_path {
            port.set_send_path(path);
        }

        let mut engine = KermitEngine::new(port);
        // Timeouts go in after construction so defaults cannot clobber them
        engine.set_timeouts(Duration::from_secs(15), Duration::from_secs(15));

        match send_path {
            Some(path) => engine.send(&path),
            None => engine.receive(),
        }
    }

    /// Consume the BINARY negotiation exchange. Clean payload that looks
    /// like an early Kermit packet is preserved for the engine; anything
    /// else is server chatter and dropped.
    fn negotiation_drain(&self, conn: &mut Connection, already_binary: bool) -> ClientResult<()> {
        let rounds = if already_binary {
            DRAIN_ROUNDS_ALREADY_BINARY
        } else {
            DRAIN_ROUNDS_NEGOTIATING
        };

        conn.socket.set_read_timeout(Some(DRAIN_ROUND_TIME))?;
        let mut buf = [0u8; 256];
        for _ in 0..rounds {
            let n = match (&conn.socket).read(&mut buf) {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let clean = conn.ingest(&buf[..n])?;
            if clean.is_empty() {
                continue;
            }
            match classify_drain_data(&clean) {
                DrainClass::EarlyPacket => {
                    warn_line(&format!(
                        "early transfer packet during negotiation: {} bytes preserved",
                        clean.len()
                    ));
                    if !conn.pending.push(&clean) {
                        warn_line("pending buffer full; early packet dropped");
                    }
                    // The transfer is about to start; stop draining
                    break;
                }
                DrainClass::Chatter => {
                    let preview: String = clean
                        .iter()
                        .take(48)
                        .map(|&b| {
                            if (32..127).contains(&b) {
                                b as char
                            } else {
                                '.'
                            }
                        })
                        .collect();
                    status_line(&format!("discarding pre-transfer text: [{}]", preview));
                }
            }
        }
        Ok(())
    }

    /// Restore option state, bring detectors back fresh, and flush
    /// whatever negotiation replies and late text are still in flight.
    fn restore(
        &self,
        conn: &mut Connection,
        saved: &telnet_protocol::OptionSnapshot,
    ) -> ClientResult<()> {
        let plan = conn.negotiator.restore(&mut conn.registry, saved);
        for (command, option) in plan {
            let bytes = telnet_protocol::negotiation_bytes(command, option);
            conn.send_raw(&bytes)?;
        }

        conn.detectors.reinitialize();
        conn.framer.reset();

        // Late bytes would otherwise feed the detectors or the terminal
        conn.socket.set_nonblocking(true)?;
        let mut flushed = 0usize;
        let mut buf = [0u8; 1024];
        for _ in 0..FLUSH_ATTEMPTS {
            match (&conn.socket).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => flushed += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(FLUSH_PAUSE);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    conn.socket.set_nonblocking(false)?;
                    return Err(e.into());
                }
            }
        }
        conn.socket.set_nonblocking(false)?;
        if flushed > 0 {
            status_line(&format!("flushed {} residual bytes after transfer", flushed));
        }
        Ok(())
    }
}
