use crate::errors::{ClientError, ClientResult};

use crossterm::style::Stylize;
use serde::{Deserialize, Serialize};

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Which protocol a transfer ran under, for log records and status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    KermitSend,
    KermitReceive,
    ZmodemSend,
    ZmodemReceive,
    XmodemSend,
    XmodemReceive,
    YmodemSend,
    YmodemReceive,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Protocol::KermitSend => "Kermit Send",
            Protocol::KermitReceive => "Kermit Receive",
            Protocol::ZmodemSend => "ZMODEM Send",
            Protocol::ZmodemReceive => "ZMODEM Receive",
            Protocol::XmodemSend => "XMODEM Send",
            Protocol::XmodemReceive => "XMODEM Receive",
            Protocol::YmodemSend => "YMODEM Send",
            Protocol::YmodemReceive => "YMODEM Receive",
        }
    }

    /// True for the protocols the in-process Kermit engine handles; the
    /// rest go through the external relay.
    pub fn is_kermit(self) -> bool {
        matches!(self, Protocol::KermitSend | Protocol::KermitReceive)
    }

    pub fn is_send(self) -> bool {
        matches!(
            self,
            Protocol::KermitSend | Protocol::ZmodemSend | Protocol::XmodemSend | Protocol::YmodemSend
        )
    }
}

/// One transfer log record, appended as a JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub timestamp: jiff::Timestamp,
    pub phase: TransferPhase,
    pub protocol: Protocol,
    pub filename: String,
    pub bytes: u64,
    pub seconds: f64,
    /// Error tag from the taxonomy, empty on success
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPhase {
    Start,
    End,
}

/// Append-only JSON-lines transfer log.
///
/// Disabled loggers swallow records so call sites stay unconditional.
pub struct TransferLog {
    path: Option<PathBuf>,
}

impl TransferLog {
    pub fn new(enabled: bool, path: &str) -> Self {
        Self {
            path: enabled.then(|| PathBuf::from(path)),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn append(&self, record: &TransferRecord) -> ClientResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let line = serde_json::to_string(record)
            .map_err(|e| ClientError::Configuration(format!("log serialization: {}", e)))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn start(&self, protocol: Protocol, filename: &str) {
        let record = TransferRecord {
            timestamp: jiff::Timestamp::now(),
            phase: TransferPhase::Start,
            protocol,
            filename: filename.to_string(),
            bytes: 0,
            seconds: 0.0,
            error: String::new(),
        };
        if let Err(e) = self.append(&record) {
            warn_line(&format!("transfer log write failed: {}", e));
        }
    }

    pub fn end(
        &self,
        protocol: Protocol,
        filename: &str,
        bytes: u64,
        seconds: f64,
        error: Option<&ClientError>,
    ) {
        let record = TransferRecord {
            timestamp: jiff::Timestamp::now(),
            phase: TransferPhase::End,
            protocol,
            filename: filename.to_string(),
            bytes,
            seconds,
            error: error.map(|e| e.tag().to_string()).unwrap_or_default(),
        };
        if let Err(e) = self.append(&record) {
            warn_line(&format!("transfer log write failed: {}", e));
        }
    }
}

fn stamp() -> String {
    jiff::Zoned::now().strftime("%H:%M:%S").to_string()
}

/// Informational status line on stdout.
pub fn status_line(message: &str) {
    println!("[{}] {}", stamp(), message);
}

/// Warning line on stderr.
pub fn warn_line(message: &str) {
    eprintln!("[{}] ! {}", stamp(), message);
}

/// Error line on stderr, red when stderr is a terminal.
pub fn error_line(message: &str) {
    let line = format!("[{}] x {}", stamp(), message);
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("{}", line.red());
    } else {
        eprintln!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_to_single_json_line() {
        let record = TransferRecord {
            timestamp: jiff::Timestamp::UNIX_EPOCH,
            phase: TransferPhase::End,
            protocol: Protocol::KermitReceive,
            filename: "notes.txt".to_string(),
            bytes: 1024,
            seconds: 2.5,
            error: String::new(),
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"kermit-receive\""));
        assert!(line.contains("\"end\""));

        let back: TransferRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.protocol, Protocol::KermitReceive);
        assert_eq!(back.bytes, 1024);
    }

    #[test]
    fn disabled_log_swallows_records() {
        let log = TransferLog::disabled();
        log.start(Protocol::KermitSend, "x");
        log.end(Protocol::KermitSend, "x", 0, 0.0, None);
    }

    #[test]
    fn enabled_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.log");
        let log = TransferLog::new(true, path.to_str().unwrap());
        log.start(Protocol::ZmodemReceive, "a.bin");
        log.end(
            Protocol::ZmodemReceive,
            "a.bin",
            512,
            1.0,
            Some(&ClientError::TransferTimeout),
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("transfer-timeout"));
    }

    #[test]
    fn protocol_classification() {
        assert!(Protocol::KermitSend.is_kermit());
        assert!(!Protocol::ZmodemReceive.is_kermit());
        assert!(Protocol::YmodemSend.is_send());
        assert!(!Protocol::XmodemReceive.is_send());
    }
}
