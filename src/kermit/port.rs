//! I/O capability surface for the Kermit engine.
//!
//! The engine is generic over [`KermitIo`], which bundles the packet
//! transport (socket side), the file store, and the status callback.
//! Production use goes through [`TelnetPort`], which speaks the
//! binary-mode telnet transport: IAC escaping on the way out, stateful
//! unescaping on the way in, pending-queue drain before the first socket
//! read, and SOH/EOM stripping.
//!
//! The file-read contract is deliberately shaped so callers cannot
//! misuse it: end of file is a distinct [`FileRead::Eof`] value rather
//! than a zero count (a zero count would send the engine into an
//! infinite refill loop), and [`SendBuffer`] owns the consume pointer so
//! every refill starts at the buffer base.

use crate::errors::{ClientError, ClientResult};
use crate::events::status_line;
use crate::transfer::PendingBytes;

use telnet_protocol::codec::{UnescapeError, Unescaper, escape};

use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::packet::{EOM, SOH};

/// Result of one packet-transport read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rx {
    /// Unescaped bytes with a leading SOH and one trailing EOM stripped.
    Data(Vec<u8>),
    /// Nothing arrived inside the timeout; the engine decides whether to
    /// retry or give up.
    Timeout,
}

/// Result of one file-buffer refill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRead {
    Filled(usize),
    /// End of file. Distinct from `Filled(0)` by construction.
    Eof,
}

/// File open intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open the send file through the stored absolute path.
    Send,
    /// Create the receiver-named file inside the download directory.
    Receive,
}

/// Close disposition, mirroring the packet type that ended the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// Z packet: end of file reached cleanly
    Eof,
    /// B packet: end of transaction
    Eot,
    /// Transfer stopped mid-data
    Interrupted,
}

/// Size and formatted mtime for the A packet / progress accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub mtime: String,
}

/// The engine's complete I/O surface.
pub trait KermitIo {
    /// Read transport bytes. Must drain the pending queue before
    /// touching the socket, strip a leading SOH and a single trailing
    /// EOM, and unescape doubled IAC bytes. A command byte in the
    /// stream means the peer left BINARY mode: fail with
    /// [`ClientError::BinaryModeLost`]. The returned byte count never
    /// exceeds `max_len + 8` (room for the long-packet CRC tail).
    fn rxd(&mut self, max_len: usize, timeout: Duration) -> ClientResult<Rx>;

    /// Write a fully framed packet, applying binary-mode IAC escaping.
    /// Loops on partial writes, retries interrupts, backs off briefly on
    /// would-block.
    fn txd(&mut self, packet: &[u8]) -> ClientResult<()>;

    /// Non-blocking "is input waiting" probe for sliding-window reads.
    /// Must not consume anything.
    fn ixd(&mut self) -> ClientResult<bool>;

    fn openf(&mut self, name: &str, mode: OpenMode) -> ClientResult<()>;

    /// Fill `buf` from the open file, always from the slice base.
    fn readf(&mut self, buf: &mut [u8]) -> ClientResult<FileRead>;

    /// Write received data. Success is `()`, never a byte count; the
    /// implementation flushes to disk at every 8 KiB boundary.
    fn writef(&mut self, data: &[u8]) -> ClientResult<()>;

    /// Close the open file. A partially received file is deleted only
    /// when `discard` is set, the port is in receive mode, the status is
    /// [`CloseStatus::Interrupted`], and keep-partial is off.
    fn closef(&mut self, status: CloseStatus, discard: bool) -> ClientResult<()>;

    fn finfo(&mut self, name: &str) -> ClientResult<FileInfo>;

    /// Status callback: transfer progress in bytes.
    fn progress(&mut self, done: u64, total: u64);
}

/// Disk flush interval for received data.
const FLUSH_INTERVAL: u64 = 8192;

/// Back-off for would-block writes.
const WRITE_BACKOFF: Duration = Duration::from_millis(5);

/// Production [`KermitIo`] over the telnet socket in BINARY mode.
pub struct TelnetPort<'a> {
    socket: &'a TcpStream,
    pending: &'a mut PendingBytes,
    unescaper: Unescaper,
    /// Unescaped bytes read but not yet returned: a TCP read can carry a
    /// fragment of a long packet or a whole burst of windowed packets.
    accumulated: Vec<u8>,

    file: Option<File>,
    current_filename: String,
    send_path: Option<PathBuf>,
    sending: bool,
    written_since_flush: u64,

    download_dir: PathBuf,
    keep_partial: bool,

    last_decile: i8,
}

impl<'a> TelnetPort<'a> {
    pub fn new(
        socket: &'a TcpStream,
        pending: &'a mut PendingBytes,
        download_dir: &Path,
        keep_partial: bool,
    ) -> Self {
        Self {
            socket,
            pending,
            unescaper: Unescaper::new(),
            accumulated: Vec::new(),
            file: None,
            current_filename: String::new(),
            send_path: None,
            sending: false,
            written_since_flush: 0,
            download_dir: download_dir.to_path_buf(),
            keep_partial,
            last_decile: -1,
        }
    }

    /// Absolute path the next `openf(OpenMode::Send)` will use.
    pub fn set_send_path(&mut self, path: &Path) {
        self.send_path = Some(path.to_path_buf());
    }

    fn drain_pending(&mut self, max_len: usize) -> Option<Rx> {
        if self.pending.is_empty() {
            return None;
        }
        let mut chunk = self.pending.take(max_len);

        if chunk.first() == Some(&SOH) {
            chunk.remove(0);
        }
        // Sanity check: early packets are short S packets, so the LEN
        // field must sit in the printable short-packet range. Anything
        // else means the drain captured garbage; dump the queue and let
        // the engine's timeout path recover with a NAK.
        if chunk.len() >= 4 {
            let len_field = chunk[0];
            if !(35..=126).contains(&len_field) {
                crate::events::warn_line(&format!(
                    "discarding implausible pending data ({})",
                    super::packet::Packet::describe(&chunk)
                ));
                self.pending.clear();
                return Some(Rx::Timeout);
            }
        }
        if matches!(chunk.last(), Some(&b) if b == EOM || b == 0x0A) {
            chunk.pop();
        }
        Some(Rx::Data(chunk))
    }

    /// Pull the next EOM-terminated packet body out of the accumulator.
    /// Control-prefix quoting keeps raw CR out of packet bodies, so the
    /// terminator scan is unambiguous.
    fn next_accumulated(&mut self, max_len: usize) -> ClientResult<Option<Vec<u8>>> {
        while let Some(end) = self.accumulated.iter().position(|&b| b == EOM) {
            let mut body: Vec<u8> = self.accumulated.drain(..=end).collect();
            body.pop(); // the EOM itself
            while body.first() == Some(&SOH) || body.first() == Some(&0x0A) {
                body.remove(0);
            }
            if body.is_empty() {
                continue;
            }
            if body.len() > max_len + 8 {
                return Err(ClientError::ProtocolFraming(format!(
                    "oversized packet: {} bytes exceeds slot of {}",
                    body.len(),
                    max_len + 8
                )));
            }
            return Ok(Some(body));
        }
        Ok(None)
    }
}

impl KermitIo for TelnetPort<'_> {
    fn rxd(&mut self, max_len: usize, timeout: Duration) -> ClientResult<Rx> {
        // Early packets saved during the negotiation drain come first
        if let Some(rx) = self.drain_pending(max_len) {
            return Ok(rx);
        }
        if let Some(body) = self.next_accumulated(max_len)? {
            return Ok(Rx::Data(body));
        }

        self.socket.set_read_timeout(Some(timeout))?;
        let mut raw = vec![0u8; (max_len + 8) * 2];
        loop {
            let n = match self.socket.read(&mut raw) {
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
                    return Ok(Rx::Timeout);
                }
                Err(e) => return Err(e.into()),
            };

            match self.unescaper.unescape(&raw[..n], &mut self.accumulated) {
                Ok(()) => {}
                Err(UnescapeError::CommandByte(_)) => return Err(ClientError::BinaryModeLost),
            }

            if let Some(body) = self.next_accumulated(max_len)? {
                return Ok(Rx::Data(body));
            }

            // Unterminated noise must not grow without bound; dump it and
            // let the NAK path resynchronize.
            if self.accumulated.len() > (max_len + 8) * 2 {
                crate::events::warn_line(&format!(
                    "dropping {} unterminated bytes from transfer stream",
                    self.accumulated.len()
                ));
                self.accumulated.clear();
                return Ok(Rx::Timeout);
            }
        }
    }

    fn txd(&mut self, packet: &[u8]) -> ClientResult<()> {
        let wire = escape(packet);
        let mut written = 0;
        while written < wire.len() {
            match self.socket.write(&wire[written..]) {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(WRITE_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn ixd(&mut self) -> ClientResult<bool> {
        self.socket.set_nonblocking(true)?;
        let mut probe = [0u8; 1];
        let ready = match self.socket.peek(&mut probe) {
            Ok(_) => true, // data waiting, or EOF the next read will surface
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(e) => {
                self.socket.set_nonblocking(false)?;
                return Err(e.into());
            }
        };
        self.socket.set_nonblocking(false)?;
        Ok(ready)
    }

    fn openf(&mut self, name: &str, mode: OpenMode) -> ClientResult<()> {
        self.file = None;
        self.written_since_flush = 0;
        match mode {
            OpenMode::Send => {
                let path = self
                    .send_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(name));
                let file = File::open(&path).map_err(|e| ClientError::FileIo {
                    path: path.display().to_string(),
                    source: e,
                })?;
                self.file = Some(file);
                self.sending = true;
                self.current_filename = name.to_string();
            }
            OpenMode::Receive => {
                // The remote names the file; only its basename is used so
                // a hostile name cannot escape the download directory.
                let basename = Path::new(name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .filter(|n| n.as_str() != ".." && !n.is_empty())
                    .unwrap_or_else(|| "received.bin".to_string());
                let path = self.download_dir.join(&basename);
                let file = File::create(&path).map_err(|e| ClientError::FileIo {
                    path: path.display().to_string(),
                    source: e,
                })?;
                self.file = Some(file);
                self.sending = false;
                self.current_filename = basename;
            }
        }
        Ok(())
    }

    fn readf(&mut self, buf: &mut [u8]) -> ClientResult<FileRead> {
        let Some(file) = self.file.as_mut() else {
            return Err(ClientError::InvalidArgument("no file open".to_string()));
        };
        loop {
            match file.read(buf) {
                Ok(0) => return Ok(FileRead::Eof),
                Ok(n) => return Ok(FileRead::Filled(n)),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(ClientError::FileIo {
                        path: self.current_filename.clone(),
                        source: e,
                    });
                }
            }
        }
    }

    fn writef(&mut self, data: &[u8]) -> ClientResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(ClientError::InvalidArgument("no file open".to_string()));
        };
        file.write_all(data).map_err(|e| ClientError::FileIo {
            path: self.current_filename.clone(),
            source: e,
        })?;
        self.written_since_flush += data.len() as u64;
        if self.written_since_flush >= FLUSH_INTERVAL {
            file.sync_data().map_err(|e| ClientError::FileIo {
                path: self.current_filename.clone(),
                source: e,
            })?;
            self.written_since_flush = 0;
        }
        Ok(())
    }

    fn closef(&mut self, status: CloseStatus, discard: bool) -> ClientResult<()> {
        if self.file.take().is_none() {
            return Ok(());
        }
        let delete = discard
            && !self.sending
            && status == CloseStatus::Interrupted
            && !self.keep_partial
            && !self.current_filename.is_empty();
        if delete {
            let path = self.download_dir.join(&self.current_filename);
            crate::events::warn_line(&format!(
                "deleting incomplete file: {}",
                path.display()
            ));
            if let Err(e) = std::fs::remove_file(&path) {
                crate::events::warn_line(&format!("could not delete partial file: {}", e));
            }
        }
        self.current_filename.clear();
        Ok(())
    }

    fn finfo(&mut self, name: &str) -> ClientResult<FileInfo> {
        let path = match &self.send_path {
            Some(p) => p.clone(),
            None => PathBuf::from(name),
        };
        let meta = std::fs::metadata(&path).map_err(|e| ClientError::FileIo {
            path: path.display().to_string(),
            source: e,
        })?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| jiff::Timestamp::try_from(t).ok())
            .map(|ts| {
                ts.to_zoned(jiff::tz::TimeZone::system())
                    .strftime("%Y%m%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_default();
        Ok(FileInfo {
            size: meta.len(),
            mtime,
        })
    }

    fn progress(&mut self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let decile = ((done.saturating_mul(10)) / total).min(10) as i8;
        if decile > self.last_decile {
            self.last_decile = decile;
            status_line(&format!(
                "Transfer progress: {}% ({} / {} bytes)",
                decile as u32 * 10,
                done,
                total
            ));
        }
    }
}

/// Consume-side adapter over `readf`.
///
/// The engine pulls single bytes; the adapter refills from the file
/// when drained and resets its cursor to the buffer base before every
/// fill, which is the invariant the destructive consume loop depends
/// on.
pub struct SendBuffer {
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

impl SendBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            pos: 0,
            len: 0,
        }
    }

    /// Next file byte, or `None` at end of file.
    pub fn next_byte<IO: KermitIo>(&mut self, io: &mut IO) -> ClientResult<Option<u8>> {
        if self.pos >= self.len {
            // Cursor back to base before the refill, never after
            self.pos = 0;
            self.len = 0;
            match io.readf(&mut self.buf)? {
                FileRead::Eof => return Ok(None),
                FileRead::Filled(n) => self.len = n,
            }
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Push one byte back (used when a packet fills mid-byte).
    pub fn unget(&mut self) {
        debug_assert!(self.pos > 0);
        self.pos -= 1;
    }
}
