//! Observation connector
//!
//! Observations are one-shot postings: no update/considering states, no
//! diffing. Each observation ID owns three flat topics — raw files, JSON
//! files, and streamed JSON — and every posting simply replaces the
//! retained previous one.

use crate::bus::{BusConnector, FilePostingHandler, PayloadHandler};
use crate::topic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Connector for one observation ID within the bus connector's experiment.
pub struct ObservationConnector {
    bus: Arc<BusConnector>,
    observation_id: String,
}

impl ObservationConnector {
    pub fn new(bus: Arc<BusConnector>, observation_id: &str) -> Self {
        Self {
            bus,
            observation_id: observation_id.to_string(),
        }
    }

    pub fn observation_id(&self) -> &str {
        &self.observation_id
    }

    fn raw_topic(&self) -> String {
        topic::raw_observation_topic(&self.observation_id)
    }

    fn json_topic(&self) -> String {
        topic::json_observation_topic(&self.observation_id)
    }

    fn streamed_topic(&self) -> String {
        topic::streamed_observation_topic(&self.observation_id)
    }

    /*
     * Posting
     */

    /// Post an opaque raw observation file.
    pub async fn post_raw(&self, local_file_path: &Path) {
        let timestamp = self.bus.timestamp();
        self.bus
            .post_file(&self.raw_topic(), local_file_path, &timestamp)
            .await;
    }

    /// Post a JSON observation through the repository.
    pub async fn post_json(&self, json: &[u8]) {
        let timestamp = self.bus.timestamp();
        self.bus
            .post_json_as_file(&self.json_topic(), json, &timestamp)
            .await;
    }

    /// Post a small JSON observation inline on the event channel.
    pub async fn post_streamed(&self, json: &[u8]) {
        let timestamp = self.bus.timestamp();
        self.bus
            .post_json_as_streamed(&self.streamed_topic(), json, &timestamp)
            .await;
    }

    /*
     * Listening
     */

    pub async fn listen_for_raw_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn FilePostingHandler>,
    ) {
        let local_file_name = format!("{}.raw", self.observation_id);
        self.bus
            .listen_for_file_postings(agent_id, &self.raw_topic(), &local_file_name, handler)
            .await;
    }

    pub async fn listen_for_json_postings(&self, agent_id: &str, handler: Arc<dyn PayloadHandler>) {
        self.bus
            .listen_for_json_file_postings(agent_id, &self.json_topic(), handler)
            .await;
    }

    pub async fn listen_for_streamed_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn PayloadHandler>,
    ) {
        self.bus
            .listen_for_streamed_postings(agent_id, &self.streamed_topic(), handler)
            .await;
    }

    /*
     * Synchronous gets
     */

    /// Fetch the retained raw observation into the work folder.
    pub async fn get_raw(&self, agent_id: &str, local_file_name: &str) -> Option<(PathBuf, String)> {
        self.bus
            .get_file_from_posting(agent_id, &self.raw_topic(), local_file_name)
            .await
    }

    /// Fetch the retained JSON observation.
    pub async fn get_json(&self, agent_id: &str) -> Option<(Vec<u8>, String)> {
        self.bus.get_json(agent_id, &self.json_topic()).await
    }

    /// Fetch the retained streamed observation.
    pub async fn get_streamed(&self, agent_id: &str) -> Option<(Vec<u8>, String)> {
        self.bus.get_streamed(agent_id, &self.streamed_topic()).await
    }

    /*
     * Deleting
     */

    pub async fn delete_raw(&self) {
        self.bus.delete_posting(&self.raw_topic()).await;
    }

    pub async fn delete_json(&self) {
        self.bus.delete_posting(&self.json_topic()).await;
    }
}
