//! Config loading and defaults integration tests

use modelling_bus::{BusConfig, BusError};
use std::io::Write;

const AGENT_A: &str = r#"
experiment = exp-7
agent = agent-a
work_folder = /tmp/agent-a

[ftp]
server = files.example.org
port = 21
user = ftp-user
password = ftp-pass
prefix = bus
single_server_mode = true

[mqtt]
broker = broker.example.org
port = 1883
user = mqtt-user
password = mqtt-pass
prefix = bus
"#;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(AGENT_A.as_bytes()).unwrap();

    let config = BusConfig::load(file.path()).unwrap();
    assert_eq!(config.experiment_id, "exp-7");
    assert_eq!(config.agent_id, "agent-a");
    assert_eq!(config.ftp.server, "files.example.org");
    assert!(config.ftp.single_server_mode);
    assert_eq!(config.mqtt.prefix, "bus");
}

#[test]
fn test_missing_file_is_fatal() {
    let result = BusConfig::load(std::path::Path::new("/nonexistent/agent.ini"));
    assert!(matches!(result, Err(BusError::Config(_))));
}

#[test]
fn test_bool_spellings() {
    for (spelling, expected) in [
        ("true", true),
        ("yes", true),
        ("on", true),
        ("1", true),
        ("false", false),
        ("0", false),
        ("off", false),
    ] {
        let content = format!(
            "experiment = e\nagent = a\nwork_folder = /tmp/w\n[ftp]\nactive_transfers = {spelling}\n"
        );
        let config = BusConfig::parse(&content).unwrap();
        assert_eq!(config.ftp.active_transfers, expected, "{spelling}");
    }
}

#[test]
fn test_multi_server_default() {
    let config =
        BusConfig::parse("experiment = e\nagent = a\nwork_folder = /tmp/w\n").unwrap();
    assert!(!config.ftp.single_server_mode);
}
