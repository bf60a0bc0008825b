//! Object repository connector
//!
//! Stores bulk payloads on an FTP server underneath the topic-path tree.
//! Each topic path holds exactly one file, named `payload`, overwritten on
//! every post; path uniqueness comes entirely from the topic grammar.
//!
//! One connection is dialled per operation and every transfer blocks until
//! it completes. In single-server mode all agents share one server and link
//! events omit the endpoint; in multi-server mode each agent serves its own
//! postings and readers dial the endpoint carried in the link event.

use crate::config::BusConfig;
use crate::error::BusError;
use crate::json_ops;
use crate::report::{ProgressLevel, Reporter};
use crate::topic::{self, PAYLOAD_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tracing::debug;

/// Link event pointing at a payload file in the repository. Published
/// retained on the event channel whenever a file posting is made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEvent {
    /// Origin server; omitted in single-server mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Origin port; omitted in single-server mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(rename = "filePath", default)]
    pub file_path: String,
    pub timestamp: String,
}

/// Connector to the FTP-based object repository.
pub struct RepositoryConnector {
    server: String,
    port: u16,
    user: String,
    password: String,
    prefix: String,
    experiment_id: String,
    agent_id: String,
    work_folder: PathBuf,
    single_server_mode: bool,
    active_transfers: bool,
    created_paths: Mutex<HashSet<String>>,
    reporter: Arc<Reporter>,
}

impl RepositoryConnector {
    pub fn new(config: &BusConfig, reporter: Arc<Reporter>) -> Result<Self, BusError> {
        std::fs::create_dir_all(&config.work_folder).map_err(|err| {
            BusError::Config(format!(
                "cannot create work folder {}: {err}",
                config.work_folder.display()
            ))
        })?;

        let connector = Self {
            server: config.ftp.server.clone(),
            port: config.ftp.port,
            user: config.ftp.user.clone(),
            password: config.ftp.password.clone(),
            prefix: config.ftp.prefix.clone(),
            experiment_id: config.experiment_id.clone(),
            agent_id: config.agent_id.clone(),
            work_folder: config.work_folder.clone(),
            single_server_mode: config.ftp.single_server_mode,
            active_transfers: config.ftp.active_transfers,
            created_paths: Mutex::new(HashSet::new()),
            reporter,
        };

        if connector.single_server_mode {
            connector.reporter.progress(
                ProgressLevel::Detailed,
                "Running the repository connection in single server mode.",
            );
        } else {
            connector.reporter.progress(
                ProgressLevel::Detailed,
                "Running the repository connection in multi server mode.",
            );
        }
        if connector.active_transfers {
            connector.reporter.progress(
                ProgressLevel::Detailed,
                "Running the repository connection in active transfer mode.",
            );
        } else {
            connector.reporter.progress(
                ProgressLevel::Detailed,
                "Running the repository connection in passive transfer mode.",
            );
        }

        Ok(connector)
    }

    fn local_file_path_for(&self, file_name: &str) -> PathBuf {
        self.work_folder.join(file_name)
    }

    fn environment_topic_root(&self, environment_id: &str) -> String {
        topic::experiment_root(&self.prefix, environment_id)
    }

    fn agent_topic_path(&self, topic_path: &str) -> String {
        format!(
            "{}/{}",
            topic::agent_root(&self.prefix, &self.experiment_id, &self.agent_id),
            topic_path
        )
    }

    fn dial(&self, server: &str, port: u16, credentials: Option<(&str, &str)>) -> Result<FtpStream, BusError> {
        let mut ftp = FtpStream::connect(format!("{server}:{port}"))
            .map_err(|err| BusError::Connect(format!("error connecting to the FTP server: {err}")))?;

        let (user, password) = credentials.unwrap_or(("anonymous", "anonymous"));
        ftp.login(user, password)
            .map_err(|err| BusError::Connect(format!("error logging in to the FTP server: {err}")))?;

        ftp.set_mode(if self.active_transfers {
            Mode::Active
        } else {
            Mode::Passive
        });
        ftp.transfer_type(FileType::Binary)
            .map_err(|err| BusError::Connect(format!("error setting FTP transfer type: {err}")))?;

        Ok(ftp)
    }

    fn connect(&self) -> Result<FtpStream, BusError> {
        self.dial(&self.server, self.port, Some((&self.user, &self.password)))
    }

    /// Create every intermediate directory of a remote path, memoising
    /// paths already created so repeats are no-ops.
    fn ensure_remote_path(&self, ftp: &mut FtpStream, remote_dir: &str) {
        if self.created_paths.lock().unwrap().contains(remote_dir) {
            return;
        }

        let mut covered = String::new();
        for segment in remote_dir.split('/') {
            covered.push_str(segment);
            covered.push('/');
            // Already-existing directories make this fail; that is fine.
            let _ = ftp.mkdir(&covered);
        }

        self.created_paths.lock().unwrap().insert(remote_dir.to_string());
    }

    /// Store a local file as the payload of a topic path and describe the
    /// posting as a repository event.
    pub fn add_file(
        &self,
        topic_path: &str,
        local_file_path: &Path,
        timestamp: &str,
    ) -> Result<RepositoryEvent, BusError> {
        let remote_dir = self.agent_topic_path(topic_path);
        let remote_file_path = format!("{remote_dir}/{PAYLOAD_FILE_NAME}");

        let mut file = File::open(local_file_path)
            .map_err(|err| BusError::Transfer(format!("error opening file for reading: {err}")))?;

        let mut ftp = self.connect()?;
        self.ensure_remote_path(&mut ftp, &remote_dir);

        ftp.put_file(&remote_file_path, &mut file).map_err(|err| {
            BusError::Transfer(format!(
                "error uploading file to {remote_file_path}: {err}"
            ))
        })?;
        let _ = ftp.quit();

        debug!(remote = %remote_file_path, "stored payload");

        Ok(RepositoryEvent {
            server: (!self.single_server_mode).then(|| self.server.clone()),
            port: (!self.single_server_mode).then(|| self.port.to_string()),
            file_path: remote_file_path,
            timestamp: timestamp.to_string(),
        })
    }

    /// Validate JSON content and store it as the payload of a topic path,
    /// staging it through a temporary file in the work folder.
    pub fn add_json_as_file(
        &self,
        topic_path: &str,
        json: &[u8],
        timestamp: &str,
    ) -> Result<RepositoryEvent, BusError> {
        if !json_ops::is_json(json) {
            return Err(BusError::NotJson(
                "provided content is not valid JSON".into(),
            ));
        }

        let local_file_path =
            self.local_file_path_for(&format!("{timestamp}{}", topic::JSON_EXTENSION));
        std::fs::write(&local_file_path, json)
            .map_err(|err| BusError::Transfer(format!("error writing temporary file: {err}")))?;

        let event = self.add_file(topic_path, &local_file_path, timestamp);
        let _ = std::fs::remove_file(&local_file_path);

        event
    }

    /// Download the payload a repository event points at into the work
    /// folder, under the given local file name.
    pub fn get_file(
        &self,
        event: &RepositoryEvent,
        local_file_name: &str,
    ) -> Result<PathBuf, BusError> {
        if event.file_path.is_empty() {
            return Err(BusError::Transfer("link event carries no file path".into()));
        }

        let mut ftp = if self.single_server_mode {
            self.connect()?
        } else {
            let server = event.server.as_deref().unwrap_or(&self.server);
            let port = event
                .port
                .as_deref()
                .and_then(|port| port.parse::<u16>().ok())
                .unwrap_or(self.port);
            self.dial(server, port, None)?
        };

        let buffer = ftp.retr_as_buffer(&event.file_path).map_err(|err| {
            BusError::Transfer(format!(
                "error retrieving {}: {err}",
                event.file_path
            ))
        })?;
        let _ = ftp.quit();

        let local_file_path = self.local_file_path_for(local_file_name);
        std::fs::write(&local_file_path, buffer.into_inner())
            .map_err(|err| BusError::Transfer(format!("error writing local file: {err}")))?;

        Ok(local_file_path)
    }

    /// Delete the posting stored under a topic path.
    pub fn delete_posting_path(&self, topic_path: &str) -> Result<(), BusError> {
        let remote_dir = self.agent_topic_path(topic_path);
        self.created_paths.lock().unwrap().remove(&remote_dir);

        let mut ftp = self.connect()?;
        delete_remote_path(&mut ftp, &remote_dir);
        let _ = ftp.quit();
        Ok(())
    }

    /// Delete an entire environment subtree.
    pub fn delete_environment(&self, environment_id: &str) -> Result<(), BusError> {
        let root = self.environment_topic_root(environment_id);
        self.created_paths
            .lock()
            .unwrap()
            .retain(|path| !path.starts_with(&root));

        let mut ftp = self.connect()?;
        delete_remote_path(&mut ftp, &root);
        let _ = ftp.quit();
        Ok(())
    }
}

/// Recursively delete a remote path. A path that lists as a directory has
/// all children deleted first, then the directory itself; anything else is
/// deleted as a file. There is no soft-delete.
fn delete_remote_path(ftp: &mut FtpStream, remote_path: &str) {
    let entries = ftp.nlst(Some(remote_path)).unwrap_or_default();

    let children: Vec<String> = entries
        .into_iter()
        .map(|entry| {
            if entry.contains('/') {
                entry
            } else {
                format!("{remote_path}/{entry}")
            }
        })
        .filter(|entry| {
            entry != remote_path && !entry.ends_with("/.") && !entry.ends_with("/..")
        })
        .collect();

    if children.is_empty() {
        if ftp.rm(remote_path).is_err() {
            let _ = ftp.rmdir(remote_path);
        }
    } else {
        for child in children {
            delete_remote_path(ftp, &child);
        }
        let _ = ftp.rmdir(remote_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_link_event_omits_endpoint_when_absent() {
        let event = RepositoryEvent {
            server: None,
            port: None,
            file_path: "bus/bus-version-1.0/exp/agent/artefacts/raw/a1/payload".into(),
            timestamp: "2026-01-01-12-00-00-00".into(),
        };

        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(
            encoded,
            json!({
                "filePath": "bus/bus-version-1.0/exp/agent/artefacts/raw/a1/payload",
                "timestamp": "2026-01-01-12-00-00-00",
            })
        );
    }

    #[test]
    fn test_link_event_round_trips_with_endpoint() {
        let event = RepositoryEvent {
            server: Some("files.example.org".into()),
            port: Some("2121".into()),
            file_path: "bus/x/payload".into(),
            timestamp: "2026-01-01-12-00-00-01".into(),
        };

        let encoded = serde_json::to_vec(&event).unwrap();
        let decoded: RepositoryEvent = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_link_event_tolerates_missing_file_path() {
        let decoded: RepositoryEvent =
            serde_json::from_str(r#"{"timestamp":"2026-01-01-12-00-00-02"}"#).unwrap();
        assert!(decoded.file_path.is_empty());
        assert!(decoded.server.is_none());
    }
}
