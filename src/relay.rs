//! External sender/receiver relay for the modem protocols.
//!
//! ZMODEM, XMODEM and YMODEM are not spoken in-process; the configured
//! external program is spawned with its stdin/stdout piped and the relay
//! shuttles bytes between those pipes and the socket:
//!
//! - socket to child: through the framer, so IAC commands from the peer
//!   are still honored mid-transfer
//! - child to socket: through the binary-mode escape codec
//!
//! When the peer drops BINARY mode mid-stream the relay first delivers
//! the clean bytes it already processed (they can carry the child's
//! final ACK) and only then stops reading the socket, continuing to
//! drain the child's residual output until pipe EOF or a three second
//! drain deadline.

use crate::config::TransferConfig;
use crate::errors::{ClientError, ClientResult};
use crate::events::{Protocol, status_line, warn_line};
use crate::kermit::TransferSummary;
use crate::session::Connection;
use crate::transfer;

use telnet_protocol::codec::escape;

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Socket poll interval; cancellation and timeouts are checked at this
/// cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the child may keep flushing after BINARY mode ended.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Grace period between asking the child to stop and killing it.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Run one external transfer to completion.
pub fn run(
    conn: &mut Connection,
    config: &TransferConfig,
    protocol: Protocol,
    path: Option<&Path>,
) -> ClientResult<TransferSummary> {
    let mut command = build_command(config, protocol, path)?;
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ClientError::FileIo {
            path: format!("{:?}", command.get_program()),
            source: e,
        })?;

    let mut child_stdin = child.stdin.take().ok_or_else(|| {
        ClientError::InvalidArgument("child spawned without stdin pipe".to_string())
    })?;
    let child_stdout = child.stdout.take().ok_or_else(|| {
        ClientError::InvalidArgument("child spawned without stdout pipe".to_string())
    })?;

    // Child stdout pumps to the socket from its own thread; pipe reads
    // have no portable readiness wait, and the pump must keep running
    // through drain mode anyway.
    let pump_socket = conn.socket.try_clone()?;
    let bytes_from_child = Arc::new(AtomicU64::new(0));
    let pump_failed = Arc::new(AtomicBool::new(false));
    let pump = {
        let counter = Arc::clone(&bytes_from_child);
        let failed = Arc::clone(&pump_failed);
        std::thread::spawn(move || {
            let mut stdout = child_stdout;
            let mut socket = pump_socket;
            let mut buf = [0u8; 4096];
            loop {
                let n = match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => {
                        failed.store(true, Ordering::SeqCst);
                        break;
                    }
                };
                let wire = escape(&buf[..n]);
                if socket.write_all(&wire).is_err() {
                    failed.store(true, Ordering::SeqCst);
                    break;
                }
                counter.fetch_add(n as u64, Ordering::SeqCst);
            }
        })
    };

    let result = relay_loop(
        conn,
        config,
        &mut child,
        &mut child_stdin,
        &bytes_from_child,
        &pump_failed,
    );

    // The pump thread ends at pipe EOF once the child is gone
    let status = match result {
        Ok(()) => reap(&mut child, child_stdin),
        Err(e) => {
            terminate(&mut child, child_stdin);
            let _ = pump.join();
            return Err(e);
        }
    };
    let _ = pump.join();

    let status = status?;
    match status.code() {
        Some(0) => {
            let bytes = if protocol.is_send() {
                bytes_from_child.load(Ordering::SeqCst)
            } else {
                conn.transfer.bytes_transferred
            };
            Ok(TransferSummary {
                filename: conn.transfer.filename.clone(),
                bytes,
            })
        }
        Some(code) => Err(ClientError::ChildCrash(code)),
        None => Err(ClientError::ChildTerminatedBySignal),
    }
}

fn build_command(
    config: &TransferConfig,
    protocol: Protocol,
    path: Option<&Path>,
) -> ClientResult<Command> {
    let needs_file = matches!(
        protocol,
        Protocol::ZmodemSend
            | Protocol::XmodemSend
            | Protocol::YmodemSend
            | Protocol::XmodemReceive
    );
    if needs_file && path.is_none() {
        return Err(ClientError::InvalidArgument(format!(
            "{} requires a filename",
            protocol.name()
        )));
    }

    let program = match protocol {
        Protocol::ZmodemSend => &config.send_zmodem_path,
        Protocol::ZmodemReceive => &config.receive_zmodem_path,
        Protocol::XmodemSend => &config.send_xmodem_path,
        Protocol::XmodemReceive => &config.receive_xmodem_path,
        Protocol::YmodemSend => &config.send_ymodem_path,
        Protocol::YmodemReceive => &config.receive_ymodem_path,
        Protocol::KermitSend | Protocol::KermitReceive => {
            return Err(ClientError::InvalidArgument(
                "Kermit transfers run in-process".to_string(),
            ));
        }
    };

    let mut command = Command::new(program);
    if let Some(p) = path {
        command.arg(p);
    }
    command.current_dir(&config.download_dir);
    Ok(command)
}

fn relay_loop(
    conn: &mut Connection,
    config: &TransferConfig,
    child: &mut Child,
    child_stdin: &mut std::process::ChildStdin,
    bytes_from_child: &AtomicU64,
    pump_failed: &AtomicBool,
) -> ClientResult<()> {
    let mut drain_started: Option<Instant> = None;
    let mut last_child_bytes = 0u64;

    conn.socket.set_read_timeout(Some(POLL_INTERVAL))?;
    let mut buf = [0u8; 4096];

    loop {
        if let Some(status) = child.try_wait()? {
            // Child finished; reap() re-checks the status
            let _ = status;
            return Ok(());
        }

        if pump_failed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }

        if transfer::cancel_requested() {
            return Err(ClientError::UserCancel);
        }

        if conn.transfer.timed_out(config.transfer_timeout) {
            return Err(ClientError::TransferTimeout);
        }
        if conn.transfer.data_timed_out(config.data_timeout) {
            return Err(ClientError::TransferTimeout);
        }

        // Child-side output counts as activity too
        let child_bytes = bytes_from_child.load(Ordering::SeqCst);
        if child_bytes != last_child_bytes {
            last_child_bytes = child_bytes;
            conn.transfer.touch();
        }

        if let Some(started) = drain_started {
            if started.elapsed() > DRAIN_TIMEOUT {
                status_line("drain deadline reached; finishing transfer");
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

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

        let was_binary = conn.registry.modes().binary_bidirectional();
        let clean = conn.ingest(&buf[..n])?;
        let is_binary = conn.registry.modes().binary_bidirectional();

        if !clean.is_empty() {
            conn.transfer.touch();
            conn.transfer.bytes_transferred += clean.len() as u64;
            // Deliver before any drain decision: the tail of this chunk
            // can be the child's final ACK
            if let Err(e) = child_stdin.write_all(&clean) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
                // Child already exited; the next try_wait picks it up
            }
            let _ = child_stdin.flush();
        }

        if was_binary && !is_binary {
            status_line("BINARY mode ended by remote; draining child output");
            drain_started = Some(Instant::now());
        }
    }
}

/// Normal completion: close the child's stdin and collect its status.
fn reap(child: &mut Child, child_stdin: std::process::ChildStdin) -> ClientResult<std::process::ExitStatus> {
    drop(child_stdin);
    Ok(child.wait()?)
}

/// Abnormal completion: ask the child to stop by closing its input,
/// then kill it after a grace period.
fn terminate(child: &mut Child, child_stdin: std::process::ChildStdin) {
    drop(child_stdin);
    let deadline = Instant::now() + KILL_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            _ => break,
        }
    }
    warn_line("transfer program did not exit; killing it");
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn send_protocols_require_a_file() {
        let config = Config::default().transfer;
        assert!(matches!(
            build_command(&config, Protocol::ZmodemSend, None),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(build_command(&config, Protocol::ZmodemSend, Some(Path::new("a.bin"))).is_ok());
    }

    #[test]
    fn xmodem_receive_requires_a_name() {
        let config = Config::default().transfer;
        assert!(matches!(
            build_command(&config, Protocol::XmodemReceive, None),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn receive_protocols_run_bare() {
        let config = Config::default().transfer;
        assert!(build_command(&config, Protocol::ZmodemReceive, None).is_ok());
        assert!(build_command(&config, Protocol::YmodemReceive, None).is_ok());
    }

    #[test]
    fn kermit_is_not_an_external_protocol() {
        let config = Config::default().transfer;
        assert!(matches!(
            build_command(&config, Protocol::KermitSend, Some(Path::new("x"))),
            Err(ClientError::InvalidArgument(_))
        ));
    }
}
