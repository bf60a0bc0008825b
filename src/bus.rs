//! Basic modelling bus
//!
//! Composes the event channel and the object repository into one posting
//! surface: a posting stores its payload in the repository and announces it
//! with a retained link event, or — for small JSON payloads — travels
//! inline as a streamed event. Listeners transparently materialise linked
//! payloads before handing them to the subscriber.
//!
//! ## Failure policy
//!
//! Posting never signals errors to the caller: a failed repository store or
//! publish is reported and the operation becomes a no-op. Nothing is
//! published when the payload could not be stored, so subscribers never see
//! dangling links. The retained-message model makes "post again with a
//! newer state" the natural recovery.

use crate::config::BusConfig;
use crate::error::BusError;
use crate::events::{event_payload_allowed, EventsConnector, MessageHandler};
use crate::report::{ProgressLevel, Reporter};
use crate::repository::{RepositoryConnector, RepositoryEvent};
use crate::timestamp::Clock;
use crate::topic::JSON_EXTENSION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

/// Event carrying its JSON payload inline, for payloads small enough to
/// skip the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedEvent {
    pub timestamp: String,
    pub payload: Value,
}

/// Single-method capability receiving materialised file postings.
pub trait FilePostingHandler: Send + Sync {
    fn on_posting(&self, local_file_path: &Path, timestamp: &str);
}

impl<F> FilePostingHandler for F
where
    F: Fn(&Path, &str) + Send + Sync,
{
    fn on_posting(&self, local_file_path: &Path, timestamp: &str) {
        self(local_file_path, timestamp)
    }
}

/// Single-method capability receiving JSON payloads (linked or streamed).
pub trait PayloadHandler: Send + Sync {
    fn on_payload(&self, payload: &[u8], timestamp: &str);
}

impl<F> PayloadHandler for F
where
    F: Fn(&[u8], &str) + Send + Sync,
{
    fn on_payload(&self, payload: &[u8], timestamp: &str) {
        self(payload, timestamp)
    }
}

/// The basic modelling bus: events connector + repository connector,
/// composed. Owns both transports for the lifetime of the process; the
/// layer-3 connectors hold a non-owning handle on this.
pub struct BusConnector {
    events: EventsConnector,
    repository: Arc<RepositoryConnector>,
    clock: Arc<Clock>,
    reporter: Arc<Reporter>,
    experiment_id: String,
    agent_id: String,
}

impl BusConnector {
    /// Build the bus connector: set up the repository connector and connect
    /// to the event broker (blocks until the broker accepts, retrying
    /// indefinitely). `posting_only` skips the subscribing surface.
    pub async fn connect(
        config: &BusConfig,
        reporter: Arc<Reporter>,
        posting_only: bool,
    ) -> Result<Arc<Self>, BusError> {
        let repository = Arc::new(RepositoryConnector::new(config, Arc::clone(&reporter))?);
        let events = EventsConnector::connect(config, posting_only, Arc::clone(&reporter)).await;

        Ok(Arc::new(Self {
            events,
            repository,
            clock: Arc::new(Clock::new()),
            reporter,
            experiment_id: config.experiment_id.clone(),
            agent_id: config.agent_id.clone(),
        }))
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Issue the next monotonic timestamp of this agent.
    pub fn timestamp(&self) -> String {
        self.clock.now()
    }

    /// Issue a fresh agent-scoped element ID.
    pub fn new_id(&self) -> String {
        self.clock.new_id(&self.agent_id)
    }

    async fn publish_link_event(&self, topic_path: &str, event: &RepositoryEvent) {
        match serde_json::to_vec(event) {
            Ok(message) => self.events.post_event(topic_path, message).await,
            Err(err) => self
                .reporter
                .error(format!("Something went wrong encoding the file link data: {err}")),
        }
    }

    /*
     * Posting
     */

    /// Store a local file in the repository under the topic path and
    /// announce it with a retained link event.
    pub async fn post_file(&self, topic_path: &str, local_file_path: &Path, timestamp: &str) {
        let repository = Arc::clone(&self.repository);
        let (topic_owned, local, ts) = (
            topic_path.to_string(),
            local_file_path.to_path_buf(),
            timestamp.to_string(),
        );

        let stored =
            run_blocking(move || repository.add_file(&topic_owned, &local, &ts)).await;

        match stored {
            Ok(event) => self.publish_link_event(topic_path, &event).await,
            Err(err) => self
                .reporter
                .error(format!("Could not store the posted file: {err}")),
        }
    }

    /// Validate and store JSON content as a repository file under the topic
    /// path and announce it with a retained link event.
    pub async fn post_json_as_file(&self, topic_path: &str, json: &[u8], timestamp: &str) {
        let repository = Arc::clone(&self.repository);
        let (topic_owned, json_owned, ts) = (
            topic_path.to_string(),
            json.to_vec(),
            timestamp.to_string(),
        );

        let stored =
            run_blocking(move || repository.add_json_as_file(&topic_owned, &json_owned, &ts)).await;

        match stored {
            Ok(event) => self.publish_link_event(topic_path, &event).await,
            Err(err) => self
                .reporter
                .error(format!("Could not store the posted JSON: {err}")),
        }
    }

    /// Publish small JSON content inline as a streamed event. Payloads over
    /// the event-channel size bound are routed through the repository
    /// instead.
    pub async fn post_json_as_streamed(&self, topic_path: &str, json: &[u8], timestamp: &str) {
        if !event_payload_allowed(json) {
            self.post_json_as_file(topic_path, json, timestamp).await;
            return;
        }

        let payload: Value = match serde_json::from_slice(json) {
            Ok(payload) => payload,
            Err(err) => {
                self.reporter
                    .error(format!("Provided content is not valid JSON: {err}"));
                return;
            }
        };

        let event = StreamedEvent {
            timestamp: timestamp.to_string(),
            payload,
        };
        match serde_json::to_vec(&event) {
            Ok(message) => self.events.post_event(topic_path, message).await,
            Err(err) => self
                .reporter
                .error(format!("Something went wrong encoding the streamed event: {err}")),
        }
    }

    /*
     * Listening
     */

    /// Listen for file postings; each delivery is materialised into the
    /// work folder under `local_file_name` before the handler runs.
    pub async fn listen_for_file_postings(
        &self,
        agent_id: &str,
        topic_path: &str,
        local_file_name: &str,
        handler: Arc<dyn FilePostingHandler>,
    ) {
        let repository = Arc::clone(&self.repository);
        let reporter = Arc::clone(&self.reporter);
        let local_file_name = local_file_name.to_string();

        let on_message: Arc<dyn MessageHandler> = Arc::new(move |message: &[u8]| {
            let Some(event) = decode_link_event(message) else {
                return;
            };
            match repository.get_file(&event, &local_file_name) {
                Ok(local_file_path) => handler.on_posting(&local_file_path, &event.timestamp),
                Err(err) => reporter.error(format!("Could not retrieve the posted file: {err}")),
            }
        });

        self.events
            .listen_for_events(agent_id, topic_path, on_message)
            .await;
    }

    /// Listen for JSON file postings; each delivery is downloaded, read,
    /// and the temporary file removed before the handler runs.
    pub async fn listen_for_json_file_postings(
        &self,
        agent_id: &str,
        topic_path: &str,
        handler: Arc<dyn PayloadHandler>,
    ) {
        let repository = Arc::clone(&self.repository);
        let reporter = Arc::clone(&self.reporter);
        let clock = Arc::clone(&self.clock);

        let on_message: Arc<dyn MessageHandler> = Arc::new(move |message: &[u8]| {
            let Some(event) = decode_link_event(message) else {
                return;
            };
            let local_file_name = format!("{}{}", clock.now(), JSON_EXTENSION);
            match repository.get_file(&event, &local_file_name) {
                Ok(local_file_path) => {
                    match read_and_discard(&local_file_path) {
                        Ok(payload) => handler.on_payload(&payload, &event.timestamp),
                        Err(err) => reporter
                            .error(format!("Could not read the retrieved payload: {err}")),
                    }
                }
                Err(err) => reporter.error(format!("Could not retrieve the posted JSON: {err}")),
            }
        });

        self.events
            .listen_for_events(agent_id, topic_path, on_message)
            .await;
    }

    /// Listen for streamed postings. Payloads that were re-routed through
    /// the repository for size reasons are materialised transparently.
    pub async fn listen_for_streamed_postings(
        &self,
        agent_id: &str,
        topic_path: &str,
        handler: Arc<dyn PayloadHandler>,
    ) {
        let repository = Arc::clone(&self.repository);
        let reporter = Arc::clone(&self.reporter);
        let clock = Arc::clone(&self.clock);

        let on_message: Arc<dyn MessageHandler> = Arc::new(move |message: &[u8]| {
            match decode_streamed_posting(message) {
                None => {}
                Some(StreamedPosting::Inline { payload, timestamp }) => {
                    handler.on_payload(&payload, &timestamp)
                }
                Some(StreamedPosting::Linked(event)) => {
                    let local_file_name = format!("{}{}", clock.now(), JSON_EXTENSION);
                    match repository.get_file(&event, &local_file_name) {
                        Ok(local_file_path) => match read_and_discard(&local_file_path) {
                            Ok(payload) => handler.on_payload(&payload, &event.timestamp),
                            Err(err) => reporter
                                .error(format!("Could not read the retrieved payload: {err}")),
                        },
                        Err(err) => {
                            reporter.error(format!("Could not retrieve the posted JSON: {err}"))
                        }
                    }
                }
            }
        });

        self.events
            .listen_for_events(agent_id, topic_path, on_message)
            .await;
    }

    /*
     * Synchronous gets
     */

    /// Fetch the retained file posting for a topic on demand.
    pub async fn get_file_from_posting(
        &self,
        agent_id: &str,
        topic_path: &str,
        local_file_name: &str,
    ) -> Option<(PathBuf, String)> {
        let message = self.events.message_from_event(agent_id, topic_path).await?;
        let event = decode_link_event(&message)?;
        let timestamp = event.timestamp.clone();

        let repository = Arc::clone(&self.repository);
        let local_file_name = local_file_name.to_string();
        let fetched =
            run_blocking(move || repository.get_file(&event, &local_file_name)).await;

        match fetched {
            Ok(local_file_path) => Some((local_file_path, timestamp)),
            Err(err) => {
                self.reporter
                    .error(format!("Could not retrieve the posted file: {err}"));
                None
            }
        }
    }

    /// Fetch the retained JSON posting for a topic on demand.
    pub async fn get_json(&self, agent_id: &str, topic_path: &str) -> Option<(Vec<u8>, String)> {
        let local_file_name = format!("{}{}", self.clock.now(), JSON_EXTENSION);
        let (local_file_path, timestamp) = self
            .get_file_from_posting(agent_id, topic_path, &local_file_name)
            .await?;

        match read_and_discard(&local_file_path) {
            Ok(payload) => Some((payload, timestamp)),
            Err(err) => {
                self.reporter
                    .error(format!("Could not read the retrieved payload: {err}"));
                None
            }
        }
    }

    /// Fetch the retained streamed posting for a topic on demand. Like the
    /// listening path, payloads that were re-routed through the repository
    /// for size reasons are materialised transparently.
    pub async fn get_streamed(
        &self,
        agent_id: &str,
        topic_path: &str,
    ) -> Option<(Vec<u8>, String)> {
        let message = self.events.message_from_event(agent_id, topic_path).await?;
        match decode_streamed_posting(&message)? {
            StreamedPosting::Inline { payload, timestamp } => Some((payload, timestamp)),
            StreamedPosting::Linked(event) => {
                let timestamp = event.timestamp.clone();
                let local_file_name = format!("{}{}", self.clock.now(), JSON_EXTENSION);

                let repository = Arc::clone(&self.repository);
                let fetched =
                    run_blocking(move || repository.get_file(&event, &local_file_name)).await;

                match fetched {
                    Ok(local_file_path) => match read_and_discard(&local_file_path) {
                        Ok(payload) => Some((payload, timestamp)),
                        Err(err) => {
                            self.reporter
                                .error(format!("Could not read the retrieved payload: {err}"));
                            None
                        }
                    },
                    Err(err) => {
                        self.reporter
                            .error(format!("Could not retrieve the posted JSON: {err}"));
                        None
                    }
                }
            }
        }
    }

    /*
     * Deleting
     */

    /// Delete a posting from both the event channel (empty retained value)
    /// and the repository.
    pub async fn delete_posting(&self, topic_path: &str) {
        self.events.delete_posting_path(topic_path).await;

        let repository = Arc::clone(&self.repository);
        let topic_owned = topic_path.to_string();
        if let Err(err) = run_blocking(move || repository.delete_posting_path(&topic_owned)).await
        {
            self.reporter
                .error(format!("Could not delete the repository posting: {err}"));
        }
    }

    /// Recursively delete an environment from both the event channel and
    /// the repository. Defaults to this connector's own experiment.
    pub async fn delete_environment(&self, environment: Option<&str>) {
        let environment_id = environment.unwrap_or(&self.experiment_id).to_string();
        self.reporter.progress(
            ProgressLevel::Basic,
            format!("Deleting environment: {environment_id}"),
        );

        self.events.delete_environment(&environment_id).await;

        let repository = Arc::clone(&self.repository);
        let environment_owned = environment_id.clone();
        if let Err(err) =
            run_blocking(move || repository.delete_environment(&environment_owned)).await
        {
            self.reporter
                .error(format!("Could not delete the repository subtree: {err}"));
        }
    }
}

fn decode_link_event(message: &[u8]) -> Option<RepositoryEvent> {
    if message.is_empty() {
        return None;
    }
    let event: RepositoryEvent = serde_json::from_slice(message).ok()?;
    if event.file_path.is_empty() {
        return None;
    }
    Some(event)
}

/// A decoded streamed-topic posting: inline when the payload fit the event
/// channel, linked when size routing pushed it through the repository.
enum StreamedPosting {
    Inline { payload: Vec<u8>, timestamp: String },
    Linked(RepositoryEvent),
}

fn decode_streamed_posting(message: &[u8]) -> Option<StreamedPosting> {
    if message.is_empty() {
        return None;
    }
    if let Ok(event) = serde_json::from_slice::<StreamedEvent>(message) {
        return Some(StreamedPosting::Inline {
            payload: event.payload.to_string().into_bytes(),
            timestamp: event.timestamp,
        });
    }
    decode_link_event(message).map(StreamedPosting::Linked)
}

fn read_and_discard(local_file_path: &Path) -> Result<Vec<u8>, BusError> {
    let payload = std::fs::read(local_file_path);
    let _ = std::fs::remove_file(local_file_path);
    Ok(payload?)
}

async fn run_blocking<T, F>(operation: F) -> Result<T, BusError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BusError> + Send + 'static,
{
    task::spawn_blocking(operation)
        .await
        .map_err(|err| BusError::Internal(format!("blocking task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_streamed_event_round_trip() {
        let event = StreamedEvent {
            timestamp: "2026-01-01-12-00-00-00".into(),
            payload: json!({"reading": 21.5}),
        };
        let encoded = serde_json::to_vec(&event).unwrap();
        let decoded: StreamedEvent = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_link_event_decoding_guards() {
        assert!(decode_link_event(b"").is_none());
        assert!(decode_link_event(b"not json").is_none());
        // An event without a file path is the marker of a failed store.
        assert!(decode_link_event(br#"{"timestamp":"t"}"#).is_none());
        assert!(decode_link_event(br#"{"filePath":"a/payload","timestamp":"t"}"#).is_some());
    }

    #[test]
    fn test_streamed_envelope_distinguishable_from_link() {
        // A link event must not parse as a streamed event and vice versa.
        let link = br#"{"filePath":"a/payload","timestamp":"t"}"#;
        assert!(serde_json::from_slice::<StreamedEvent>(link).is_err());

        let streamed = br#"{"timestamp":"t","payload":{"n":1}}"#;
        assert!(decode_link_event(streamed).is_none());
    }

    #[test]
    fn test_streamed_posting_decodes_inline_shape() {
        let message = br#"{"timestamp":"t1","payload":{"n":1}}"#;
        match decode_streamed_posting(message) {
            Some(StreamedPosting::Inline { payload, timestamp }) => {
                assert_eq!(payload, br#"{"n":1}"#);
                assert_eq!(timestamp, "t1");
            }
            _ => panic!("expected an inline posting"),
        }
    }

    #[test]
    fn test_streamed_posting_falls_back_to_link_shape() {
        // An oversized streamed posting travels as a link event; both the
        // listen path and the synchronous get must follow it.
        let message = br#"{"filePath":"a/payload","timestamp":"t2"}"#;
        match decode_streamed_posting(message) {
            Some(StreamedPosting::Linked(event)) => {
                assert_eq!(event.file_path, "a/payload");
                assert_eq!(event.timestamp, "t2");
            }
            _ => panic!("expected a linked posting"),
        }

        assert!(decode_streamed_posting(b"").is_none());
        assert!(decode_streamed_posting(b"not json").is_none());
    }
}
