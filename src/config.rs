//! Configuration for the modelling bus
//!
//! Agents are configured through an INI-style file:
//!
//! ```ini
//! experiment = exp-7
//! agent = agent-a
//! work_folder = /tmp/agent-a
//!
//! [ftp]
//! server = files.example.org
//! port = 21
//! user = agent
//! password = secret
//! prefix = bus
//! single_server_mode = true
//!
//! [mqtt]
//! broker = broker.example.org
//! port = 1883
//! user = agent
//! password = secret
//! prefix = bus
//! ```

use crate::error::BusError;
use ini::Ini;
use std::path::{Path, PathBuf};

const DEFAULT_FTP_PORT: u16 = 21;
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Repository (FTP) endpoint configuration.
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub prefix: String,
    /// All agents share one repository server; link events omit server/port.
    pub single_server_mode: bool,
    /// Use active instead of passive FTP transfers.
    pub active_transfers: bool,
}

/// Event channel (MQTT) endpoint configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub prefix: String,
}

/// Full agent configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub experiment_id: String,
    pub agent_id: String,
    pub work_folder: PathBuf,
    pub ftp: FtpConfig,
    pub mqtt: MqttConfig,
}

fn get_string(section: Option<&ini::Properties>, key: &str) -> String {
    section
        .and_then(|properties| properties.get(key))
        .unwrap_or_default()
        .to_string()
}

fn get_bool(section: Option<&ini::Properties>, key: &str, default: bool) -> bool {
    match section.and_then(|properties| properties.get(key)) {
        Some(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        ),
        None => default,
    }
}

fn get_port(section: Option<&ini::Properties>, key: &str, default: u16) -> Result<u16, BusError> {
    match section.and_then(|properties| properties.get(key)) {
        Some(value) => value
            .trim()
            .parse::<u16>()
            .map_err(|_| BusError::Config(format!("invalid {key} port: {value}"))),
        None => Ok(default),
    }
}

impl BusConfig {
    /// Load the configuration from an INI file. Missing or unreadable
    /// configuration is fatal at startup.
    pub fn load(path: &Path) -> Result<Self, BusError> {
        let file = Ini::load_from_file(path).map_err(|err| {
            BusError::Config(format!("failed to read config file {}: {err}", path.display()))
        })?;

        Self::from_ini(&file)
    }

    /// Parse configuration from an INI string.
    pub fn parse(content: &str) -> Result<Self, BusError> {
        let file = Ini::load_from_str(content)
            .map_err(|err| BusError::Config(format!("failed to parse config: {err}")))?;

        Self::from_ini(&file)
    }

    fn from_ini(file: &Ini) -> Result<Self, BusError> {
        let root = Some(file.general_section());
        let ftp = file.section(Some("ftp"));
        let mqtt = file.section(Some("mqtt"));

        let config = Self {
            experiment_id: get_string(root, "experiment"),
            agent_id: get_string(root, "agent"),
            work_folder: PathBuf::from(get_string(root, "work_folder")),
            ftp: FtpConfig {
                server: get_string(ftp, "server"),
                port: get_port(ftp, "port", DEFAULT_FTP_PORT)?,
                user: get_string(ftp, "user"),
                password: get_string(ftp, "password"),
                prefix: get_string(ftp, "prefix"),
                single_server_mode: get_bool(ftp, "single_server_mode", false),
                active_transfers: get_bool(ftp, "active_transfers", false),
            },
            mqtt: MqttConfig {
                broker: get_string(mqtt, "broker"),
                port: get_port(mqtt, "port", DEFAULT_MQTT_PORT)?,
                user: get_string(mqtt, "user"),
                password: get_string(mqtt, "password"),
                prefix: get_string(mqtt, "prefix"),
            },
        };

        if config.experiment_id.is_empty() {
            return Err(BusError::Config("missing experiment ID".into()));
        }
        if config.agent_id.is_empty() {
            return Err(BusError::Config("missing agent ID".into()));
        }
        if config.work_folder.as_os_str().is_empty() {
            return Err(BusError::Config("missing work_folder".into()));
        }

        Ok(config)
    }
}
