//! Embedded Kermit file-transfer engine.
//!
//! Runs one send or receive to completion over the binary-mode telnet
//! stream, with its own framing, acknowledgment scheme, retransmission
//! policy and block checks. The engine owns the protocol state machine;
//! all I/O goes through the [`port::KermitIo`] capability so tests can
//! drive it from scripted exchanges.
//!
//! Protocol shape (sender side): S-init negotiates parameters under the
//! Type-1 check, then F (file header), D (data), Z (end of file) and B
//! (end of transaction) run under the negotiated check, each awaiting a
//! matching ACK. The receiver mirrors this. Long packets carry up to
//! 4096 data bytes; a sliding window keeps up to 31 packets in flight.

pub mod packet;
pub mod port;

use crate::errors::{ClientError, ClientResult, RetryKind};
use crate::events::warn_line;
use crate::transfer;

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use packet::{BlockCheck, EOM, Packet, PacketType, QCTL, ctl, decode_data, encode_data, tochar, unchar};
use port::{CloseStatus, KermitIo, OpenMode, Rx, SendBuffer};

/// Sliding-window capability bit in the S-init CAPAS field.
const CAP_LP: u8 = 0x02;
const CAP_SW: u8 = 0x04;

/// File-side buffer: a 4096-byte payload doubles worst case under
/// control-prefix quoting.
const FILE_BUFFER: usize = 8192;

/// Engine tuning installed at construction; timeouts are set afterwards
/// so a caller cannot have them silently overwritten by the defaults.
#[derive(Debug, Clone)]
pub struct KermitParams {
    /// Check type requested in the S-init (Type 3 unless downgraded by
    /// the peer)
    pub block_check: BlockCheck,
    /// Sliding-window slots offered
    pub window_slots: u8,
    /// Largest data payload per packet offered
    pub max_packet_data: usize,
    pub recv_timeout: Duration,
    pub send_timeout: Duration,
    pub max_consecutive_naks: u32,
    pub max_consecutive_timeouts: u32,
    /// Global transfer deadline, independent of per-packet timeouts
    pub deadline: Duration,
}

impl Default for KermitParams {
    fn default() -> Self {
        Self {
            block_check: BlockCheck::Type3,
            window_slots: 31,
            max_packet_data: 4096,
            recv_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(15),
            max_consecutive_naks: 10,
            max_consecutive_timeouts: 5,
            deadline: Duration::from_secs(60),
        }
    }
}

/// What a completed transfer amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub filename: String,
    pub bytes: u64,
}

/// One in-flight data packet awaiting its ACK.
struct InFlight {
    seq: u8,
    framed: Vec<u8>,
    raw_len: u64,
}

/// Parsed result of one inbound read.
enum Inbound {
    Packet(Packet),
    Timeout,
    /// Unparseable bytes; logged, handled like a corrupt packet.
    Garbage,
}

pub struct KermitEngine<IO: KermitIo> {
    io: IO,
    params: KermitParams,
    /// Check actually in force (Type 1 until the S exchange agrees)
    check_in_force: BlockCheck,
    /// Peer-negotiated data payload cap
    negotiated_max_data: usize,
    /// Peer-negotiated window
    negotiated_window: u8,
    seq: u8,
    consecutive_naks: u32,
    consecutive_timeouts: u32,
    started: Instant,
    bytes_done: u64,
    bytes_total: u64,
}

impl<IO: KermitIo> KermitEngine<IO> {
    pub fn new(io: IO) -> Self {
        let params = KermitParams::default();
        Self {
            io,
            negotiated_max_data: params.max_packet_data,
            negotiated_window: params.window_slots,
            params,
            check_in_force: BlockCheck::Type1,
            seq: 0,
            consecutive_naks: 0,
            consecutive_timeouts: 0,
            started: Instant::now(),
            bytes_done: 0,
            bytes_total: 0,
        }
    }

    /// Install packet timeouts. Called after construction, mirroring the
    /// init ordering the protocol defaults would otherwise clobber.
    pub fn set_timeouts(&mut self, recv: Duration, send: Duration) {
        self.params.recv_timeout = recv;
        self.params.send_timeout = send;
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    /// Send one file. `path` is the local file; its basename travels in
    /// the F packet.
    pub fn send(&mut self, path: &Path) -> ClientResult<TransferSummary> {
        let result = self.send_inner(path);
        if result.is_err() {
            let _ = self.io.closef(CloseStatus::Interrupted, false);
        }
        result
    }

    fn send_inner(&mut self, path: &Path) -> ClientResult<TransferSummary> {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ClientError::InvalidArgument(format!("not a file path: {}", path.display()))
            })?;

        self.started = Instant::now();
        let info = self.io.finfo(&path.to_string_lossy())?;
        self.bytes_total = info.size;
        self.io.openf(&basename, OpenMode::Send)?;

        // S-init under the Type-1 check
        self.seq = 0;
        let sinit = Packet::new(0, PacketType::SendInit, self.init_payload());
        let ack = self.exchange(&sinit)?;
        self.negotiate_from_peer(&ack.data);

        // File header
        self.seq = 1;
        let mut name_data = Vec::new();
        encode_data(basename.as_bytes(), &mut name_data);
        let fheader = Packet::new(self.seq, PacketType::FileHeader, name_data);
        self.exchange(&fheader)?;

        // File attributes: exact size in bytes ("1" attribute)
        self.advance_seq();
        let attr = Packet::new(self.seq, PacketType::Attributes, self.attribute_payload());
        self.exchange(&attr)?;
        self.advance_seq();

        self.pump_data()?;

        // End of file, end of transaction
        let eof = Packet::new(self.seq, PacketType::Eof, Vec::new());
        self.exchange(&eof)?;
        self.advance_seq();
        let brk = Packet::new(self.seq, PacketType::Break, Vec::new());
        self.exchange(&brk)?;

        Ok(TransferSummary {
            filename: basename,
            bytes: self.bytes_done,
        })
    }

    /// Receive one file into the port's download directory.
    pub fn receive(&mut self) -> ClientResult<TransferSummary> {
        let result = self.receive_inner();
        if result.is_err() {
            // Closes and (policy permitting) deletes a half-written file;
            // a no-op when nothing is open
            let _ = self.io.closef(CloseStatus::Interrupted, true);
        }
        result
    }

    fn receive_inner(&mut self) -> ClientResult<TransferSummary> {
        self.started = Instant::now();
        let mut filename = String::new();

        // Wait for the sender's S-init
        let speer = loop {
            self.check_deadline()?;
            self.check_cancel()?;
            match self.read_inbound()? {
                Inbound::Packet(p) if p.ptype == PacketType::SendInit => break p,
                Inbound::Packet(p) if p.ptype == PacketType::Error => {
                    return Err(self.peer_error(&p));
                }
                Inbound::Packet(_) | Inbound::Garbage => self.nak_counted(0)?,
                Inbound::Timeout => {
                    self.count_timeout()?;
                    self.nak(0)?;
                }
            }
        };
        self.negotiate_from_peer(&speer.data);
        // The ACK advertises the agreed check, not our original offer
        let mut ack_payload = self.init_payload();
        ack_payload[7] = match self.check_in_force {
            BlockCheck::Type1 => b'1',
            BlockCheck::Type3 => b'3',
        };
        self.ack_with(speer.seq, ack_payload.clone())?;
        self.reset_counters();

        let mut expected = 1u8;

        loop {
            self.check_deadline()?;
            self.check_cancel()?;

            match self.read_inbound()? {
                Inbound::Packet(p) => match p.ptype {
                    PacketType::SendInit => {
                        // Our ACK was lost; answer again
                        self.ack_with(p.seq, ack_payload.clone())?;
                    }
                    PacketType::FileHeader => {
                        if p.seq == expected {
                            let mut name = Vec::new();
                            decode_data(&p.data, &mut name);
                            filename = String::from_utf8_lossy(&name).into_owned();
                            self.io.openf(&filename, OpenMode::Receive)?;
                            self.ack(p.seq)?;
                            expected = next_seq(expected);
                            self.reset_counters();
                        } else {
                            self.re_ack_or_nak(p.seq, expected)?;
                        }
                    }
                    PacketType::Attributes => {
                        if p.seq == expected {
                            self.parse_attributes(&p.data);
                            self.ack(p.seq)?;
                            expected = next_seq(expected);
                            self.reset_counters();
                        } else {
                            self.re_ack_or_nak(p.seq, expected)?;
                        }
                    }
                    PacketType::Data => {
                        if p.seq == expected {
                            let mut raw = Vec::with_capacity(p.data.len());
                            decode_data(&p.data, &mut raw);
                            self.io.writef(&raw)?;
                            self.bytes_done += raw.len() as u64;
                            self.io.progress(self.bytes_done, self.bytes_total);
                            self.ack(p.seq)?;
                            expected = next_seq(expected);
                            self.reset_counters();
                        } else if p.seq == prev_seq(expected) {
                            // Duplicate: our ACK was lost
                            self.ack(p.seq)?;
                        } else {
                            self.nak_counted(expected)?;
                        }
                    }
                    PacketType::Eof => {
                        if p.seq == expected {
                            self.io.closef(CloseStatus::Eof, true)?;
                            self.ack(p.seq)?;
                            expected = next_seq(expected);
                            self.reset_counters();
                        } else {
                            self.re_ack_or_nak(p.seq, expected)?;
                        }
                    }
                    PacketType::Break => {
                        self.ack(p.seq)?;
                        return Ok(TransferSummary {
                            filename,
                            bytes: self.bytes_done,
                        });
                    }
                    PacketType::Error => {
                        return Err(self.peer_error(&p));
                    }
                    PacketType::Ack | PacketType::Nak => {
                        // Not meaningful to a receiver; ignore
                    }
                },
                Inbound::Garbage => {
                    self.nak_counted(expected)?;
                }
                Inbound::Timeout => {
                    self.count_timeout()?;
                    self.nak(expected)?;
                }
            }
        }
    }

    // ---- negotiation ----

    /// S-init parameter payload: MAXL TIME NPAD PADC EOL QCTL QBIN CHKT
    /// REPT CAPAS WINDO MAXLX1 MAXLX2.
    fn init_payload(&self) -> Vec<u8> {
        let maxl = self.params.max_packet_data;
        vec![
            tochar(94),
            tochar(self.params.recv_timeout.as_secs().min(94) as u8),
            tochar(0),
            ctl(0),
            tochar(EOM),
            QCTL,
            b'Y', // 8-bit quoting agreed but unused on an 8-bit clean link
            match self.params.block_check {
                BlockCheck::Type1 => b'1',
                BlockCheck::Type3 => b'3',
            },
            b' ', // no repeat-count prefixing
            tochar(CAP_LP | CAP_SW),
            tochar(self.params.window_slots),
            tochar((maxl / 95) as u8),
            tochar((maxl % 95) as u8),
        ]
    }

    /// Adopt the intersection of our offer and the peer's.
    fn negotiate_from_peer(&mut self, peer: &[u8]) {
        self.check_in_force = match peer.get(7) {
            Some(&b'3') if self.params.block_check == BlockCheck::Type3 => BlockCheck::Type3,
            _ => BlockCheck::Type1,
        };
        if let Some(&windo) = peer.get(10) {
            let peer_window = unchar(windo);
            if (1..=31).contains(&peer_window) {
                self.negotiated_window = self.params.window_slots.min(peer_window);
            }
        }
        let extended = match (peer.get(11), peer.get(12)) {
            (Some(&x1), Some(&x2)) => {
                usize::from(unchar(x1)) * 95 + usize::from(unchar(x2))
            }
            _ => 0,
        };
        if extended >= 32 {
            self.negotiated_max_data = self.params.max_packet_data.min(extended);
        } else if let Some(&maxl) = peer.first() {
            let short = usize::from(unchar(maxl));
            if short >= 10 {
                // Short-packet peer: LEN covers SEQ TYPE DATA CHECK
                self.negotiated_max_data = short.saturating_sub(2 + 3).max(10);
            }
        }
    }

    /// A-packet payload carrying the exact byte size ("1" attribute).
    fn attribute_payload(&self) -> Vec<u8> {
        let digits = self.bytes_total.to_string();
        let mut payload = vec![b'1', tochar(digits.len() as u8)];
        payload.extend_from_slice(digits.as_bytes());
        payload
    }

    fn parse_attributes(&mut self, data: &[u8]) {
        let mut i = 0;
        while i + 1 < data.len() {
            let attr = data[i];
            let len = usize::from(unchar(data[i + 1]));
            let end = (i + 2 + len).min(data.len());
            if attr == b'1' {
                if let Ok(text) = std::str::from_utf8(&data[i + 2..end]) {
                    if let Ok(size) = text.parse::<u64>() {
                        self.bytes_total = size;
                    }
                }
            }
            i = end;
        }
    }

    // ---- data pump (sender) ----

    fn pump_data(&mut self) -> ClientResult<()> {
        let mut window: VecDeque<InFlight> = VecDeque::new();
        let mut source = SendBuffer::new(FILE_BUFFER);
        let mut file_done = false;

        while !file_done || !window.is_empty() {
            self.check_deadline()?;
            self.check_cancel()?;

            // Keep the window full while the line is quiet
            while !file_done && (window.len() as u8) < self.negotiated_window {
                match self.next_data_payload(&mut source)? {
                    Some((payload, raw_len)) => {
                        let p = Packet::new(self.seq, PacketType::Data, payload);
                        let framed = p.encode(self.check_in_force);
                        self.io.txd(&framed)?;
                        window.push_back(InFlight {
                            seq: self.seq,
                            framed,
                            raw_len,
                        });
                        self.advance_seq();
                    }
                    None => {
                        file_done = true;
                        self.io.closef(CloseStatus::Eof, false)?;
                    }
                }
                // Service ACKs as soon as they queue up
                if self.io.ixd()? {
                    break;
                }
            }

            if window.is_empty() {
                continue;
            }

            match self.read_inbound()? {
                Inbound::Packet(p) => match p.ptype {
                    PacketType::Ack => {
                        if window.iter().any(|f| f.seq == p.seq) {
                            // TCP keeps the stream ordered, so an ACK for
                            // a later packet covers everything before it
                            loop {
                                let Some(front) = window.pop_front() else { break };
                                self.bytes_done += front.raw_len;
                                let done = front.seq == p.seq;
                                if done {
                                    break;
                                }
                            }
                            self.io.progress(self.bytes_done, self.bytes_total);
                            self.reset_counters();
                        }
                    }
                    PacketType::Nak => {
                        self.count_nak()?;
                        if let Some(flight) = window.iter().find(|f| f.seq == p.seq) {
                            warn_line(&format!(
                                "NAK for data packet {} ({})",
                                p.seq,
                                Packet::describe(&flight.framed[1..flight.framed.len() - 1])
                            ));
                            let framed = flight.framed.clone();
                            self.io.txd(&framed)?;
                        } else if let Some(front) = window.front() {
                            let framed = front.framed.clone();
                            self.io.txd(&framed)?;
                        }
                    }
                    PacketType::Error => return Err(self.peer_error(&p)),
                    _ => {
                        // Unexpected type mid-data; treat like line noise
                        self.count_nak()?;
                    }
                },
                Inbound::Garbage => {
                    self.count_nak()?;
                    if let Some(front) = window.front() {
                        let framed = front.framed.clone();
                        self.io.txd(&framed)?;
                    }
                }
                Inbound::Timeout => {
                    self.count_timeout()?;
                    if let Some(front) = window.front() {
                        let framed = front.framed.clone();
                        self.io.txd(&framed)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Build the next control-prefixed payload, at most the negotiated
    /// data size. Returns the payload plus the raw byte count it covers,
    /// or `None` at end of file.
    fn next_data_payload(
        &mut self,
        source: &mut SendBuffer,
    ) -> ClientResult<Option<(Vec<u8>, u64)>> {
        let limit = self.negotiated_max_data;
        let mut payload = Vec::with_capacity(limit);
        let mut raw_len = 0u64;

        loop {
            let Some(byte) = source.next_byte(&mut self.io)? else {
                break;
            };
            let mut encoded = Vec::with_capacity(2);
            encode_data(&[byte], &mut encoded);
            if payload.len() + encoded.len() > limit {
                source.unget();
                break;
            }
            payload.extend_from_slice(&encoded);
            raw_len += 1;
        }

        if payload.is_empty() {
            Ok(None)
        } else {
            Ok(Some((payload, raw_len)))
        }
    }

    // ---- stop-and-wait exchange (S, F, A, Z, B) ----

    /// Transmit `packet` and wait for its ACK, honoring the retry caps.
    fn exchange(&mut self, packet: &Packet) -> ClientResult<Packet> {
        let framed = packet.encode(self.check_in_force);
        self.io.txd(&framed)?;

        loop {
            self.check_deadline()?;
            self.check_cancel()?;

            match self.read_inbound()? {
                Inbound::Packet(p) => match p.ptype {
                    PacketType::Ack if p.seq == packet.seq => {
                        self.reset_counters();
                        return Ok(p);
                    }
                    PacketType::Nak => {
                        self.count_nak()?;
                        warn_line(&format!(
                            "NAK for {} packet {}",
                            packet.ptype.to_byte() as char,
                            packet.seq
                        ));
                        self.io.txd(&framed)?;
                    }
                    PacketType::Error => return Err(self.peer_error(&p)),
                    _ => {
                        // Stale or out-of-order packet; keep waiting
                    }
                },
                Inbound::Garbage => {
                    self.count_nak()?;
                    self.io.txd(&framed)?;
                }
                Inbound::Timeout => {
                    self.count_timeout()?;
                    self.io.txd(&framed)?;
                }
            }
        }
    }

    // ---- inbound plumbing ----

    /// One packet body from the transport.
    fn read_inbound(&mut self) -> ClientResult<Inbound> {
        let max_len = self.params.max_packet_data + 32;
        let body = match self.io.rxd(max_len, self.params.recv_timeout)? {
            Rx::Timeout => return Ok(Inbound::Timeout),
            Rx::Data(body) => body,
        };
        match Packet::parse(&body, self.check_in_force) {
            Ok(p) => Ok(Inbound::Packet(p)),
            Err(e) => {
                warn_line(&format!(
                    "rejected packet: {} ({})",
                    e,
                    Packet::describe(&body)
                ));
                Ok(Inbound::Garbage)
            }
        }
    }

    fn ack(&mut self, seq: u8) -> ClientResult<()> {
        let p = Packet::new(seq, PacketType::Ack, Vec::new());
        self.io.txd(&p.encode(self.check_in_force))
    }

    fn ack_with(&mut self, seq: u8, data: Vec<u8>) -> ClientResult<()> {
        let p = Packet::new(seq, PacketType::Ack, data);
        self.io.txd(&p.encode(self.check_in_force))
    }

    fn nak(&mut self, seq: u8) -> ClientResult<()> {
        let p = Packet::new(seq, PacketType::Nak, Vec::new());
        self.io.txd(&p.encode(self.check_in_force))
    }

    fn nak_counted(&mut self, seq: u8) -> ClientResult<()> {
        self.count_nak()?;
        self.nak(seq)
    }

    /// Duplicate of an already-confirmed packet gets its ACK again;
    /// anything else out of order draws a NAK for what we expected.
    fn re_ack_or_nak(&mut self, got: u8, expected: u8) -> ClientResult<()> {
        if got == prev_seq(expected) {
            self.ack(got)
        } else {
            self.nak_counted(expected)
        }
    }

    // ---- caps, deadline, cancellation ----

    fn reset_counters(&mut self) {
        self.consecutive_naks = 0;
        self.consecutive_timeouts = 0;
    }

    fn count_nak(&mut self) -> ClientResult<()> {
        self.consecutive_naks += 1;
        if self.consecutive_naks > self.params.max_consecutive_naks {
            self.send_error("too many NAKs");
            return Err(ClientError::RetryLimitExceeded {
                kind: RetryKind::Nak,
                limit: self.params.max_consecutive_naks,
            });
        }
        Ok(())
    }

    fn count_timeout(&mut self) -> ClientResult<()> {
        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts > self.params.max_consecutive_timeouts {
            self.send_error("receive timeout");
            return Err(ClientError::RetryLimitExceeded {
                kind: RetryKind::Timeout,
                limit: self.params.max_consecutive_timeouts,
            });
        }
        Ok(())
    }

    fn check_deadline(&mut self) -> ClientResult<()> {
        if self.started.elapsed() > self.params.deadline {
            self.send_error("transfer deadline exceeded");
            return Err(ClientError::TransferTimeout);
        }
        Ok(())
    }

    fn check_cancel(&mut self) -> ClientResult<()> {
        if transfer::cancel_requested() {
            self.send_error("cancelled by user");
            return Err(ClientError::UserCancel);
        }
        Ok(())
    }

    /// Best-effort E packet; failures are irrelevant at this point.
    fn send_error(&mut self, message: &str) {
        let mut data = Vec::new();
        encode_data(message.as_bytes(), &mut data);
        let p = Packet::new(self.seq, PacketType::Error, data);
        let _ = self.io.txd(&p.encode(self.check_in_force));
    }

    fn peer_error(&mut self, p: &Packet) -> ClientError {
        let mut message = Vec::new();
        decode_data(&p.data, &mut message);
        ClientError::ProtocolFraming(format!(
            "peer error: {}",
            String::from_utf8_lossy(&message)
        ))
    }

    fn advance_seq(&mut self) {
        self.seq = next_seq(self.seq);
    }
}

fn next_seq(seq: u8) -> u8 {
    (seq + 1) & 63
}

fn prev_seq(seq: u8) -> u8 {
    seq.wrapping_sub(1) & 63
}
