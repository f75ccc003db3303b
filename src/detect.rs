//! File-transfer auto-detection.
//!
//! Three independent engines watch the clean data stream (after the
//! framer) for the byte patterns a remote sender or receiver emits when
//! it starts a transfer. Text cues use a bounded sliding window with
//! case-insensitive comparison; repeat cues count trigger bytes inside a
//! short time window. All engines are paused for the lifetime of an
//! active transfer and re-initialized afterwards.

use std::time::{Duration, Instant};

/// ZMODEM hex-prefix window (the ZRQINIT/ZRINIT/ZFILE prefix is 6 bytes,
/// the window absorbs interleaved banner noise).
const ZMODEM_WINDOW: usize = 32;

/// Sliding window for XMODEM/YMODEM text cues.
const XY_WINDOW: usize = 64;

/// Repeats of NAK or 'C' required to fire.
const MIN_REPEATS: u32 = 3;

/// The repeats must land inside this span.
const DETECT_WINDOW: Duration = Duration::from_secs(3);

const NAK: u8 = 0x15;
const CRC_REQUEST: u8 = b'C';

/// Which side the detected handshake puts us on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The remote is about to send; we should start a receive.
    WeReceive,
    /// The remote is ready to receive; we should start a send.
    WeSend,
}

fn window_push(window: &mut Vec<u8>, cap: usize, byte: u8) {
    if window.len() >= cap {
        window.remove(0);
    }
    window.push(byte);
}

fn ends_with_ci(window: &[u8], pattern: &[u8]) -> bool {
    if window.len() < pattern.len() {
        return false;
    }
    let tail = &window[window.len() - pattern.len()..];
    tail.iter()
        .zip(pattern)
        .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

/// ZMODEM detection: the `** ZDLE B 0 x` hex prefix of ZRQINIT, ZRINIT
/// or ZFILE, or the literal "rz\r" a remote `sz` prints before framing.
#[derive(Debug, Clone)]
pub struct ZmodemDetector {
    window: Vec<u8>,
    enabled: bool,
}

impl Default for ZmodemDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ZmodemDetector {
    pub fn new() -> Self {
        Self {
            window: Vec::with_capacity(ZMODEM_WINDOW),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.window.clear();
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Option<Trigger> {
        if !self.enabled {
            return None;
        }
        for &byte in data {
            window_push(&mut self.window, ZMODEM_WINDOW, byte);

            // ZRQINIT (**<ZDLE>B00), ZRINIT (..01), ZFILE (..08): the
            // remote is sending in every case.
            for frame_digit in [b'0', b'1', b'8'] {
                if self
                    .window
                    .ends_with(&[0x2A, 0x2A, 0x18, 0x42, 0x30, frame_digit])
                {
                    self.window.clear();
                    return Some(Trigger::WeReceive);
                }
            }

            if self.window.ends_with(b"rz\r") || self.window.ends_with(b"rz\r\n") {
                self.window.clear();
                return Some(Trigger::WeReceive);
            }
        }
        None
    }
}

/// Shared state for the NAK/'C' repeat counters.
#[derive(Debug, Clone, Default)]
struct RepeatState {
    last_char: u8,
    count: u32,
    first_seen: Option<Instant>,
    last_seen: Option<Instant>,
}

impl RepeatState {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn stale(&self, now: Instant) -> bool {
        matches!(self.last_seen, Some(seen) if now.duration_since(seen) > DETECT_WINDOW)
    }
}

/// XMODEM detection: "XMODEM receive" / "XMODEM send" text cues (the
/// remote is sending, we receive) or repeated NAK/'C' polls (the remote
/// is a receiver waiting for us to send).
#[derive(Debug, Clone)]
pub struct XmodemDetector {
    window: Vec<u8>,
    repeats: RepeatState,
    enabled: bool,
}

impl Default for XmodemDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl XmodemDetector {
    pub fn new() -> Self {
        Self {
            window: Vec::with_capacity(XY_WINDOW),
            repeats: RepeatState::default(),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.window.clear();
            self.repeats.reset();
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Option<Trigger> {
        self.push_at(data, Instant::now())
    }

    pub fn push_at(&mut self, data: &[u8], now: Instant) -> Option<Trigger> {
        if !self.enabled {
            return None;
        }
        if self.repeats.stale(now) {
            self.repeats.reset();
        }
        for &byte in data {
            window_push(&mut self.window, XY_WINDOW, byte);
            if ends_with_ci(&self.window, b"XMODEM receive")
                || ends_with_ci(&self.window, b"XMODEM send")
            {
                self.window.clear();
                self.repeats.reset();
                return Some(Trigger::WeReceive);
            }

            if byte == NAK || byte == CRC_REQUEST {
                if byte == self.repeats.last_char {
                    self.repeats.count += 1;
                    self.repeats.last_seen = Some(now);
                    if self.repeats.count >= MIN_REPEATS {
                        let in_window = self
                            .repeats
                            .first_seen
                            .is_some_and(|first| now.duration_since(first) <= DETECT_WINDOW);
                        if in_window {
                            self.repeats.reset();
                            return Some(Trigger::WeSend);
                        }
                    }
                } else {
                    self.repeats.last_char = byte;
                    self.repeats.count = 1;
                    self.repeats.first_seen = Some(now);
                    self.repeats.last_seen = Some(now);
                }
            } else if (0x20..0x7F).contains(&byte) {
                // Printable non-trigger byte: ordinary text, not a poll
                self.repeats.reset();
            }
        }
        None
    }
}

/// YMODEM detection: text cues as for XMODEM, or repeated 'C' polls for
/// a batch receive. The 'C' counter is separate from the XMODEM one so
/// both engines may observe the same bytes; whichever fires first wins
/// and the supervisor pauses both.
#[derive(Debug, Clone)]
pub struct YmodemDetector {
    window: Vec<u8>,
    repeats: RepeatState,
    enabled: bool,
}

impl Default for YmodemDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl YmodemDetector {
    pub fn new() -> Self {
        Self {
            window: Vec::with_capacity(XY_WINDOW),
            repeats: RepeatState::default(),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.window.clear();
            self.repeats.reset();
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Option<Trigger> {
        self.push_at(data, Instant::now())
    }

    pub fn push_at(&mut self, data: &[u8], now: Instant) -> Option<Trigger> {
        if !self.enabled {
            return None;
        }
        if self.repeats.stale(now) {
            self.repeats.reset();
        }
        for &byte in data {
            window_push(&mut self.window, XY_WINDOW, byte);
            if ends_with_ci(&self.window, b"YMODEM receive")
                || ends_with_ci(&self.window, b"YMODEM send")
            {
                self.window.clear();
                self.repeats.reset();
                return Some(Trigger::WeReceive);
            }

            if byte == CRC_REQUEST {
                self.repeats.count += 1;
                self.repeats.last_seen = Some(now);
                if self.repeats.first_seen.is_none() {
                    self.repeats.first_seen = Some(now);
                }
                if self.repeats.count >= MIN_REPEATS {
                    let in_window = self
                        .repeats
                        .first_seen
                        .is_some_and(|first| now.duration_since(first) <= DETECT_WINDOW);
                    if in_window {
                        self.repeats.reset();
                        return Some(Trigger::WeSend);
                    }
                }
            } else if (0x20..0x7F).contains(&byte) {
                self.repeats.reset();
            }
        }
        None
    }
}

/// The three engines as the session owns them.
#[derive(Debug, Clone, Default)]
pub struct Detectors {
    pub zmodem: ZmodemDetector,
    pub xmodem: XmodemDetector,
    pub ymodem: YmodemDetector,
}

impl Detectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable all engines and clear their counters (transfer active).
    pub fn pause(&mut self) {
        self.zmodem.set_enabled(false);
        self.xmodem.set_enabled(false);
        self.ymodem.set_enabled(false);
    }

    /// Fresh counters and windows after a transfer.
    pub fn reinitialize(&mut self) {
        *self = Self::new();
    }
}
