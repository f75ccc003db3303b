//! Interactive session: connection state, the mode gate, and the
//! readiness loop that multiplexes stdin and the socket.
//!
//! Modes:
//! - CLIENT: stdin bytes go to the remote (IAC-escaped), socket bytes go
//!   through the framer to the terminal, detectors watch the clean data
//! - CONSOLE: stdin edits a local command line; commands can start
//!   transfers or close the session
//! - TRANSFER: stdin is ignored (except ETX, which requests
//!   cancellation) and the socket belongs to the transfer engine
//!
//! The mode is the gate that keeps the framer's data emission and the
//! detectors from corrupting an active transfer.

use crate::config::Config;
use crate::detect::{Detectors, Trigger};
use crate::errors::{ClientError, ClientResult};
use crate::events::{Protocol, TransferLog, status_line, warn_line};
use crate::transfer::{PendingBytes, Supervisor, TransferRequest, TransferState};

use telnet_protocol::{
    Command, Framer, Negotiator, OptionRegistry, SubnegotiationDispatcher, TelnetEvent,
    WindowSize, frame, negotiation_bytes, opt,
};

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::time::Duration;

/// Byte that opens the console from CLIENT mode (Ctrl+]).
const CONSOLE_ESCAPE: u8 = 0x1D;
/// Cancellation byte honored during TRANSFER mode (Ctrl+C under a raw
/// terminal).
const ETX: u8 = 0x03;

/// Socket poll cadence of the session loop.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Client,
    Console,
    Transfer,
}

/// Everything owned per connection: the socket, protocol state, advisory
/// terminal fields, the early-packet queue and the detector engines.
pub struct Connection {
    pub socket: TcpStream,
    pub framer: Framer,
    pub registry: OptionRegistry,
    pub negotiator: Negotiator,
    pub dispatcher: SubnegotiationDispatcher,
    pub window: WindowSize,
    pub pending: PendingBytes,
    pub detectors: Detectors,
    pub transfer: TransferState,
    pub mode: Mode,
}

impl Connection {
    pub fn connect(host: &str, port: u16, config: &Config) -> ClientResult<Self> {
        let address = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClientError::InvalidArgument(format!("cannot resolve {}", host)))?;
        let socket = TcpStream::connect_timeout(&address, config.connection.connect_timeout)?;
        socket.set_nodelay(true)?;

        Ok(Self {
            socket,
            framer: Framer::new(),
            registry: OptionRegistry::new(),
            negotiator: Negotiator::new(),
            dispatcher: SubnegotiationDispatcher::new(&config.terminal.speed),
            window: WindowSize::new(config.terminal.width, config.terminal.height),
            pending: PendingBytes::new(),
            detectors: Detectors::new(),
            transfer: TransferState::default(),
            mode: Mode::Client,
        })
    }

    /// Write raw protocol bytes (already framed/escaped as needed).
    pub fn send_raw(&self, bytes: &[u8]) -> ClientResult<()> {
        let mut written = 0;
        while written < bytes.len() {
            match (&self.socket).write(&bytes[written..]) {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Write user data, doubling IAC bytes.
    pub fn send_data(&self, data: &[u8]) -> ClientResult<()> {
        self.send_raw(&telnet_protocol::escape(data))
    }

    /// Feed raw socket bytes through the framer, answer every control
    /// event, and return the clean application data.
    pub fn ingest(&mut self, raw: &[u8]) -> ClientResult<Vec<u8>> {
        let remote_binary = self.registry.modes().binary_remote;
        let parsed = self.framer.feed(raw, remote_binary);

        for event in parsed.events {
            match event {
                TelnetEvent::Negotiation { command, option } => {
                    let outcome = self.negotiator.handle(&mut self.registry, command, option);
                    if let Some((verb, opt_code)) = outcome.reply {
                        self.send_raw(&negotiation_bytes(verb, opt_code))?;
                    }
                    // NAWS is client-initiated: report the size as soon
                    // as the option goes active
                    if option == opt::NAWS && outcome.state_changed && outcome.enabled {
                        self.send_raw(&frame(&self.window.payload()))?;
                    }
                }
                TelnetEvent::Subnegotiation { data } => {
                    let handled = self.dispatcher.dispatch(&data);
                    if let Some(reply) = handled.reply {
                        self.send_raw(&reply)?;
                    }
                    if let Some(edit) = handled.linemode_edit {
                        self.registry.set_linemode_edit(edit);
                    }
                }
                TelnetEvent::Command(Command::Ayt) => {
                    self.send_data(b"\r\n[lineterm: yes, I'm here]\r\n")?;
                }
                TelnetEvent::Command(_) => {
                    // GA/NOP/DM/EOR/EL/EC/BREAK/IP/AO are log-only
                }
                TelnetEvent::UnknownCommand(byte) => {
                    warn_line(&format!("unknown telnet command 0x{:02X}", byte));
                }
                TelnetEvent::SubnegotiationOverflow { option, len } => {
                    warn_line(&format!(
                        "oversized subnegotiation for option {} dropped ({} bytes)",
                        opt::name(option),
                        len
                    ));
                }
            }
        }

        Ok(parsed.data)
    }

    /// Report a window-size change if NAWS is active.
    pub fn update_window_size(&mut self, width: u16, height: u16) -> ClientResult<()> {
        let changed = self.window.width != width || self.window.height != height;
        self.window = WindowSize::new(width, height);
        if changed && self.registry.local(opt::NAWS) {
            self.send_raw(&frame(&self.window.payload()))?;
        }
        Ok(())
    }
}

pub struct Session {
    conn: Connection,
    supervisor: Supervisor,
    config: Config,
    stdin_rx: Receiver<Vec<u8>>,
    transfer_active: Arc<AtomicBool>,
    console_buffer: String,
    done: bool,
}

impl Session {
    pub fn new(conn: Connection, config: Config) -> Self {
        let log = TransferLog::new(
            config.logging.transfer_log_enabled,
            &config.logging.transfer_log_file,
        );
        let supervisor = Supervisor::new(config.transfer.clone(), log);
        let transfer_active = Arc::new(AtomicBool::new(false));
        let stdin_rx = spawn_stdin_pump(Arc::clone(&transfer_active));

        let mut session = Self {
            conn,
            supervisor,
            config,
            stdin_rx,
            transfer_active,
            console_buffer: String::new(),
            done: false,
        };
        session.apply_detector_config();
        session
    }

    fn apply_detector_config(&mut self) {
        let transfer = &self.config.transfer;
        self.conn
            .detectors
            .zmodem
            .set_enabled(transfer.auto_zmodem);
        self.conn
            .detectors
            .xmodem
            .set_enabled(transfer.auto_xmodem);
        self.conn
            .detectors
            .ymodem
            .set_enabled(transfer.auto_ymodem);
    }

    /// Run until the user closes the session or the peer disconnects.
    pub fn run(&mut self) -> ClientResult<()> {
        status_line("Press Ctrl+] for the console");
        self.conn.socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let mut buf = [0u8; 4096];

        while !self.done {
            self.drain_stdin()?;
            if self.done {
                break;
            }

            let n = match (&self.conn.socket).read(&mut buf) {
                Ok(0) => {
                    status_line("Connection closed by remote host");
                    return Ok(());
                }
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

            let clean = self.conn.ingest(&buf[..n])?;
            if clean.is_empty() {
                continue;
            }

            // Clean data reaches the terminal in CLIENT and CONSOLE
            // modes; TRANSFER mode never gets here because the engine
            // owns the socket for its duration.
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&clean)?;
            stdout.flush()?;

            if self.conn.mode == Mode::Client {
                if let Some(request) = self.check_detectors(&clean) {
                    self.run_transfer(request);
                }
            }
        }

        Ok(())
    }

    fn check_detectors(&mut self, clean: &[u8]) -> Option<TransferRequest> {
        if let Some(Trigger::WeReceive) = self.conn.detectors.zmodem.push(clean) {
            status_line("ZMODEM transfer detected; starting receive");
            return Some(TransferRequest::External {
                protocol: Protocol::ZmodemReceive,
                path: None,
            });
        }
        match self.conn.detectors.xmodem.push(clean) {
            Some(Trigger::WeReceive) => {
                // rx needs a local filename, which only the console can
                // supply
                status_line("XMODEM offer detected; use the console: rx <filename>");
            }
            Some(Trigger::WeSend) => {
                status_line("XMODEM receiver detected; use the console: sx <filename>");
            }
            None => {}
        }
        match self.conn.detectors.ymodem.push(clean) {
            Some(Trigger::WeReceive) => {
                status_line("YMODEM transfer detected; starting receive");
                return Some(TransferRequest::External {
                    protocol: Protocol::YmodemReceive,
                    path: None,
                });
            }
            Some(Trigger::WeSend) => {
                status_line("YMODEM receiver detected; use the console: sb <filename>");
            }
            None => {}
        }
        None
    }

    fn run_transfer(&mut self, request: TransferRequest) {
        self.transfer_active.store(true, Ordering::SeqCst);
        let result = self.supervisor.execute(&mut self.conn, request);
        self.transfer_active.store(false, Ordering::SeqCst);

        // Keystrokes typed during the transfer are not session input
        while self.stdin_rx.try_recv().is_ok() {}
        self.apply_detector_config();
        // The transfer machinery adjusts socket timeouts for its own
        // pacing; reclaim the session cadence
        let _ = self.conn.socket.set_read_timeout(Some(POLL_INTERVAL));

        if let Err(ClientError::ConnectionClosed) = result {
            self.done = true;
        }
    }

    fn drain_stdin(&mut self) -> ClientResult<()> {
        loop {
            let chunk = match self.stdin_rx.try_recv() {
                Ok(chunk) => chunk,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            };
            match self.conn.mode {
                Mode::Client => self.client_input(&chunk)?,
                Mode::Console => self.console_input(&chunk)?,
                Mode::Transfer => {
                    // Gated: the engine owns the line
                }
            }
            if self.done {
                return Ok(());
            }
        }
    }

    fn client_input(&mut self, chunk: &[u8]) -> ClientResult<()> {
        if let Some(pos) = chunk.iter().position(|&b| b == CONSOLE_ESCAPE) {
            if pos > 0 {
                self.conn.send_data(&chunk[..pos])?;
            }
            self.enter_console();
            // Remaining bytes belong to the console line
            let rest = chunk[pos + 1..].to_vec();
            if !rest.is_empty() {
                self.console_input(&rest)?;
            }
            return Ok(());
        }
        self.conn.send_data(chunk)
    }

    fn enter_console(&mut self) {
        self.conn.mode = Mode::Console;
        self.console_buffer.clear();
        print!("\r\nlineterm> ");
        let _ = std::io::stdout().flush();
    }

    fn leave_console(&mut self) {
        self.conn.mode = Mode::Client;
        self.console_buffer.clear();
        println!("\r");
    }

    fn console_input(&mut self, chunk: &[u8]) -> ClientResult<()> {
        for &byte in chunk {
            match byte {
                b'\r' | b'\n' => {
                    println!("\r");
                    let line = std::mem::take(&mut self.console_buffer);
                    self.dispatch_command(line.trim())?;
                    if self.conn.mode == Mode::Console && !self.done {
                        print!("lineterm> ");
                        let _ = std::io::stdout().flush();
                    }
                }
                0x08 | 0x7F => {
                    if self.console_buffer.pop().is_some() {
                        print!("\x08 \x08");
                        let _ = std::io::stdout().flush();
                    }
                }
                CONSOLE_ESCAPE => self.leave_console(),
                byte if (0x20..0x7F).contains(&byte) => {
                    self.console_buffer.push(byte as char);
                    print!("{}", byte as char);
                    let _ = std::io::stdout().flush();
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn dispatch_command(&mut self, line: &str) -> ClientResult<()> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let argument = parts.next().map(PathBuf::from);

        let request = match command {
            "" => {
                self.leave_console();
                return Ok(());
            }
            "help" | "?" => {
                println!("Commands:\r");
                println!("  send <file>     send a file with Kermit\r");
                println!("  receive         receive a file with Kermit\r");
                println!("  sz <file>       send with ZMODEM\r");
                println!("  rz              receive with ZMODEM\r");
                println!("  sx <file>       send with XMODEM\r");
                println!("  rx <file>       receive with XMODEM (names the local file)\r");
                println!("  sb <file>       send with YMODEM\r");
                println!("  rb              receive with YMODEM\r");
                println!("  status          show connection state\r");
                println!("  close           close the connection and exit\r");
                println!("  (empty line returns to the session)\r");
                return Ok(());
            }
            "status" => {
                let modes = self.conn.registry.modes();
                println!(
                    "binary: local={} remote={}  echo: remote={}  sga: local={} remote={}\r",
                    modes.binary_local,
                    modes.binary_remote,
                    modes.echo_remote,
                    modes.sga_local,
                    modes.sga_remote
                );
                println!(
                    "linemode: active={} edit={}  window: {}x{}\r",
                    modes.linemode_active,
                    modes.linemode_edit,
                    self.conn.window.width,
                    self.conn.window.height
                );
                return Ok(());
            }
            "close" | "quit" | "exit" => {
                self.done = true;
                return Ok(());
            }
            "send" => match argument {
                Some(path) => TransferRequest::KermitSend { path },
                None => {
                    println!("usage: send <file>\r");
                    return Ok(());
                }
            },
            "receive" => TransferRequest::KermitReceive,
            "sz" | "sx" | "sb" => {
                let Some(path) = argument else {
                    println!("usage: {} <file>\r", command);
                    return Ok(());
                };
                let protocol = match command {
                    "sz" => Protocol::ZmodemSend,
                    "sx" => Protocol::XmodemSend,
                    _ => Protocol::YmodemSend,
                };
                TransferRequest::External {
                    protocol,
                    path: Some(path),
                }
            }
            "rz" | "rb" => TransferRequest::External {
                protocol: if command == "rz" {
                    Protocol::ZmodemReceive
                } else {
                    Protocol::YmodemReceive
                },
                path: None,
            },
            "rx" => match argument {
                Some(path) => TransferRequest::External {
                    protocol: Protocol::XmodemReceive,
                    path: Some(path),
                },
                None => {
                    println!("usage: rx <file>\r");
                    return Ok(());
                }
            },
            other => {
                println!("unknown command: {} (try 'help')\r", other);
                return Ok(());
            }
        };

        self.leave_console();
        self.run_transfer(request);
        Ok(())
    }
}

/// Stdin pump: raw bytes to the session over a channel. During a
/// transfer the bytes are discarded here, except ETX which trips the
/// cancellation flag (the signal-handler path for embedders is
/// [`crate::transfer::request_cancel`]).
fn spawn_stdin_pump(transfer_active: Arc<AtomicBool>) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            let n = match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            let chunk = &buf[..n];
            if transfer_active.load(Ordering::SeqCst) {
                if chunk.contains(&ETX) {
                    crate::transfer::request_cancel();
                }
                continue;
            }
            if tx.send(chunk.to_vec()).is_err() {
                break;
            }
        }
    });
    rx
}
