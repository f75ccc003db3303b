use crate::errors::ConfigError;

use std::fs;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub terminal: TerminalConfig,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub default_port: u16,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Speed string reported by the TSPEED option
    pub speed: String,
    /// Initial window size advisories for NAWS
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Directory received files are written into
    pub download_dir: String,
    /// Keep partially received files on error (the Kermit ikeep flag)
    pub keep_partial: bool,
    /// Overall transfer deadline for external relay transfers
    pub transfer_timeout: Duration,
    /// Inactivity deadline between data packets
    pub data_timeout: Duration,
    /// External sender/receiver program paths for the modem protocols
    pub send_zmodem_path: String,
    pub receive_zmodem_path: String,
    pub send_xmodem_path: String,
    pub receive_xmodem_path: String,
    pub send_ymodem_path: String,
    pub receive_ymodem_path: String,
    /// Auto-detection switches
    pub auto_zmodem: bool,
    pub auto_xmodem: bool,
    pub auto_ymodem: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub transfer_log_enabled: bool,
    pub transfer_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                default_port: 23,
                connect_timeout: Duration::from_secs(10),
            },
            terminal: TerminalConfig {
                speed: "38400,38400".to_string(),
                width: 80,
                height: 24,
            },
            transfer: TransferConfig {
                download_dir: ".".to_string(),
                keep_partial: false,
                transfer_timeout: Duration::from_secs(300), // 5 minutes
                data_timeout: Duration::from_secs(30),
                send_zmodem_path: "/usr/bin/sz".to_string(),
                receive_zmodem_path: "/usr/bin/rz".to_string(),
                send_xmodem_path: "/usr/bin/sx".to_string(),
                receive_xmodem_path: "/usr/bin/rx".to_string(),
                send_ymodem_path: "/usr/bin/sb".to_string(),
                receive_ymodem_path: "/usr/bin/rb".to_string(),
                auto_zmodem: true,
                auto_xmodem: true,
                auto_ymodem: true,
            },
            logging: LoggingConfig {
                transfer_log_enabled: false,
                transfer_log_file: "transfer.log".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse_config(&content),
            Err(_) => {
                // Create default config file if it doesn't exist
                let default_config = Self::default();
                let config_content = default_config.to_config_file_format();
                if let Err(e) = fs::write(path, config_content) {
                    eprintln!("Warning: Could not create default config file: {}", e);
                }
                Ok(default_config)
            }
        }
    }

    fn parse_config(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut current_section = String::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Handle sections
            if line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len() - 1].to_string();
                continue;
            }

            // Handle key-value pairs
            if let Some(eq_pos) = line.find('=') {
                let key = line[..eq_pos].trim();
                let value = line[eq_pos + 1..].trim().trim_matches('"');

                match current_section.as_str() {
                    "connection" => config.parse_connection_config(key, value)?,
                    "terminal" => config.parse_terminal_config(key, value)?,
                    "transfer" => config.parse_transfer_config(key, value)?,
                    "logging" => config.parse_logging_config(key, value)?,
                    _ => return Err(ConfigError::UnknownSection(current_section.clone())),
                }
            }
        }

        Ok(config)
    }

    fn parse_connection_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "default_port" => {
                self.connection.default_port = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "connect_timeout" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
                self.connection.connect_timeout = Duration::from_secs(secs);
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_terminal_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "speed" => {
                self.terminal.speed = value.to_string();
            }
            "width" => {
                self.terminal.width = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "height" => {
                self.terminal.height = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_transfer_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "download_dir" => {
                self.transfer.download_dir = value.to_string();
            }
            "keep_partial" => {
                self.transfer.keep_partial = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "transfer_timeout" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
                self.transfer.transfer_timeout = Duration::from_secs(secs);
            }
            "data_timeout" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
                self.transfer.data_timeout = Duration::from_secs(secs);
            }
            "send_zmodem_path" => self.transfer.send_zmodem_path = value.to_string(),
            "receive_zmodem_path" => self.transfer.receive_zmodem_path = value.to_string(),
            "send_xmodem_path" => self.transfer.send_xmodem_path = value.to_string(),
            "receive_xmodem_path" => self.transfer.receive_xmodem_path = value.to_string(),
            "send_ymodem_path" => self.transfer.send_ymodem_path = value.to_string(),
            "receive_ymodem_path" => self.transfer.receive_ymodem_path = value.to_string(),
            "auto_zmodem" => {
                self.transfer.auto_zmodem = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "auto_xmodem" => {
                self.transfer.auto_xmodem = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "auto_ymodem" => {
                self.transfer.auto_ymodem = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_logging_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "transfer_log_enabled" => {
                self.logging.transfer_log_enabled = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "transfer_log_file" => {
                self.logging.transfer_log_file = value.to_string();
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn to_config_file_format(&self) -> String {
        format!(
            r#"# Lineterm configuration
# Values shown are the defaults.

[connection]
default_port = {}
connect_timeout = {}

[terminal]
speed = "{}"
width = {}
height = {}

[transfer]
download_dir = "{}"
keep_partial = {}
transfer_timeout = {}
data_timeout = {}
send_zmodem_path = "{}"
receive_zmodem_path = "{}"
send_xmodem_path = "{}"
receive_xmodem_path = "{}"
send_ymodem_path = "{}"
receive_ymodem_path = "{}"
auto_zmodem = {}
auto_xmodem = {}
auto_ymodem = {}

[logging]
transfer_log_enabled = {}
transfer_log_file = "{}"
"#,
            self.connection.default_port,
            self.connection.connect_timeout.as_secs(),
            self.terminal.speed,
            self.terminal.width,
            self.terminal.height,
            self.transfer.download_dir,
            self.transfer.keep_partial,
            self.transfer.transfer_timeout.as_secs(),
            self.transfer.data_timeout.as_secs(),
            self.transfer.send_zmodem_path,
            self.transfer.receive_zmodem_path,
            self.transfer.send_xmodem_path,
            self.transfer.receive_xmodem_path,
            self.transfer.send_ymodem_path,
            self.transfer.receive_ymodem_path,
            self.transfer.auto_zmodem,
            self.transfer.auto_xmodem,
            self.transfer.auto_ymodem,
            self.logging.transfer_log_enabled,
            self.logging.transfer_log_file,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_file_format() {
        let config = Config::default();
        let parsed = Config::parse_config(&config.to_config_file_format()).unwrap();
        assert_eq!(parsed.connection.default_port, 23);
        assert_eq!(parsed.transfer.transfer_timeout, Duration::from_secs(300));
        assert_eq!(parsed.transfer.data_timeout, Duration::from_secs(30));
        assert_eq!(parsed.terminal.speed, "38400,38400");
        assert!(!parsed.transfer.keep_partial);
    }

    #[test]
    fn parse_overrides_values() {
        let content = r#"
[transfer]
keep_partial = true
data_timeout = 45

[terminal]
speed = "9600,9600"
"#;
        let config = Config::parse_config(content).unwrap();
        assert!(config.transfer.keep_partial);
        assert_eq!(config.transfer.data_timeout, Duration::from_secs(45));
        assert_eq!(config.terminal.speed, "9600,9600");
        // Untouched sections keep their defaults
        assert_eq!(config.connection.default_port, 23);
    }

    #[test]
    fn unknown_section_and_key_rejected() {
        assert!(matches!(
            Config::parse_config("[nope]\nx = 1"),
            Err(ConfigError::UnknownSection(_))
        ));
        assert!(matches!(
            Config::parse_config("[terminal]\nbogus = 1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            Config::parse_config("[terminal]\nwidth = wide"),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }
}
