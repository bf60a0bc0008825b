//! Event channel connector
//!
//! Wraps the MQTT client into the retained-pub/sub surface the bus needs.
//! Every posting is published retained, so late joiners always receive the
//! last value per topic; deleting a posting means publishing a zero-length
//! retained value.
//!
//! ## Connection policy
//!
//! The initial connect retries indefinitely with a fixed back-off. Once the
//! session is established, a lost connection is fatal: missed retained
//! messages would leave the artefact state machines incoherent, so the
//! process terminates with a diagnostic instead of resubscribing in-band.
//!
//! ## Delivery
//!
//! Subscription handlers are invoked serially, off the event-loop task, and
//! may block (the bus materialises repository payloads inside them).
//! Subscriptions persist for the lifetime of the connector; unsubscribing
//! is not part of the contract.

use crate::config::BusConfig;
use crate::report::{ProgressLevel, Reporter};
use crate::topic::{agent_root, experiment_root};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::debug;

/// Largest payload that may travel inline on the event channel. Anything
/// bigger is routed through the repository as a linked file.
pub const MAX_EVENT_PAYLOAD_SIZE: usize = 300;

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const RETAINED_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const RETAINED_SWEEP_WINDOW: Duration = Duration::from_secs(1);
const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Whether a payload fits the inline event path.
pub fn event_payload_allowed(payload: &[u8]) -> bool {
    payload.len() <= MAX_EVENT_PAYLOAD_SIZE
}

/// Single-method capability invoked for every message delivered on a
/// subscribed topic.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn on_message(&self, payload: &[u8]) {
        self(payload)
    }
}

struct Subscription {
    filter: String,
    handler: Arc<dyn MessageHandler>,
}

struct SweepCollector {
    filter: String,
    topics: mpsc::UnboundedSender<String>,
}

/// Connector to the MQTT event channel.
pub struct EventsConnector {
    client: AsyncClient,
    prefix: String,
    experiment_id: String,
    agent_id: String,
    posting_only: bool,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    pending_fetches: Arc<Mutex<HashMap<String, Vec<oneshot::Sender<Vec<u8>>>>>>,
    sweeps: Arc<Mutex<Vec<SweepCollector>>>,
    reporter: Arc<Reporter>,
}

impl EventsConnector {
    /// Connect to the broker. Blocks until the session is established,
    /// retrying indefinitely with a fixed back-off.
    pub async fn connect(
        config: &BusConfig,
        posting_only: bool,
        reporter: Arc<Reporter>,
    ) -> Self {
        let mut options = MqttOptions::new(
            format!("modelling-bus-{}", config.agent_id),
            config.mqtt.broker.clone(),
            config.mqtt.port,
        );
        options.set_credentials(config.mqtt.user.clone(), config.mqtt.password.clone());
        options.set_keep_alive(Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY);

        let connector = Self {
            client,
            prefix: config.mqtt.prefix.clone(),
            experiment_id: config.experiment_id.clone(),
            agent_id: config.agent_id.clone(),
            posting_only,
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            pending_fetches: Arc::new(Mutex::new(HashMap::new())),
            sweeps: Arc::new(Mutex::new(Vec::new())),
            reporter,
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(run_event_loop(
            event_loop,
            Arc::clone(&connector.subscriptions),
            Arc::clone(&connector.pending_fetches),
            Arc::clone(&connector.sweeps),
            Arc::clone(&connector.reporter),
            ready_tx,
        ));

        // The event-loop task retries until the broker accepts us.
        let _ = ready_rx.await;
        connector
    }

    fn own_topic(&self, topic_path: &str) -> String {
        format!(
            "{}/{}",
            agent_root(&self.prefix, &self.experiment_id, &self.agent_id),
            topic_path
        )
    }

    fn topic_for(&self, agent_id: &str, topic_path: &str) -> String {
        format!(
            "{}/{}",
            agent_root(&self.prefix, &self.experiment_id, agent_id),
            topic_path
        )
    }

    /// Publish a retained message on this agent's topic.
    pub async fn post_event(&self, topic_path: &str, message: Vec<u8>) {
        let topic = self.own_topic(topic_path);
        if let Err(err) = self
            .client
            .publish(topic.as_str(), QoS::AtLeastOnce, true, message)
            .await
        {
            self.reporter
                .error(format!("Error publishing on the event channel: {err}"));
        }
    }

    /// Subscribe to a topic of the given agent (or [`crate::topic::ANY_AGENT`])
    /// and hand every delivered message to `handler`.
    pub async fn listen_for_events(
        &self,
        agent_id: &str,
        topic_path: &str,
        handler: Arc<dyn MessageHandler>,
    ) {
        if self.posting_only {
            self.reporter.progress(
                ProgressLevel::Detailed,
                "Posting-only connector; ignoring listen request.",
            );
            return;
        }

        let filter = self.topic_for(agent_id, topic_path);
        self.subscriptions.write().await.push(Subscription {
            filter: filter.clone(),
            handler,
        });

        if let Err(err) = self.client.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
            self.reporter
                .error(format!("Error subscribing to {filter}: {err}"));
        }
    }

    /// Fetch the retained message for a topic on demand, without leaving a
    /// standing subscription behind. Returns `None` when there is no
    /// retained value (or the broker does not answer within the timeout).
    pub async fn message_from_event(&self, agent_id: &str, topic_path: &str) -> Option<Vec<u8>> {
        let topic = self.topic_for(agent_id, topic_path);

        let (message_tx, message_rx) = oneshot::channel();
        self.pending_fetches
            .lock()
            .unwrap()
            .entry(topic.clone())
            .or_default()
            .push(message_tx);

        if let Err(err) = self.client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
            self.reporter
                .error(format!("Error subscribing to {topic}: {err}"));
            self.pending_fetches.lock().unwrap().remove(&topic);
            return None;
        }

        let message = tokio::time::timeout(RETAINED_FETCH_TIMEOUT, message_rx).await;
        let _ = self.client.unsubscribe(topic.as_str()).await;

        match message {
            Ok(Ok(payload)) => Some(payload),
            _ => {
                self.pending_fetches.lock().unwrap().remove(&topic);
                None
            }
        }
    }

    /// Delete the retained posting at a topic by publishing a zero-length
    /// retained value.
    pub async fn delete_posting_path(&self, topic_path: &str) {
        self.post_event(topic_path, Vec::new()).await;
    }

    /// Clear every retained posting underneath an environment.
    ///
    /// The broker cannot enumerate retained topics, so this subscribes to
    /// the environment wildcard, collects the retained topics it is handed
    /// until the stream goes quiet, then clears each one.
    pub async fn delete_environment(&self, environment_id: &str) {
        let filter = format!("{}/#", experiment_root(&self.prefix, environment_id));

        let (topics_tx, mut topics_rx) = mpsc::unbounded_channel();
        self.sweeps.lock().unwrap().push(SweepCollector {
            filter: filter.clone(),
            topics: topics_tx,
        });

        if let Err(err) = self.client.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
            self.reporter
                .error(format!("Error subscribing to {filter}: {err}"));
            self.sweeps.lock().unwrap().retain(|sweep| sweep.filter != filter);
            return;
        }

        let mut topics = HashSet::new();
        while let Ok(Some(topic)) =
            tokio::time::timeout(RETAINED_SWEEP_WINDOW, topics_rx.recv()).await
        {
            topics.insert(topic);
        }

        let _ = self.client.unsubscribe(filter.as_str()).await;
        self.sweeps.lock().unwrap().retain(|sweep| sweep.filter != filter);

        for topic in &topics {
            if let Err(err) = self
                .client
                .publish(topic.as_str(), QoS::AtLeastOnce, true, Vec::<u8>::new())
                .await
            {
                self.reporter
                    .error(format!("Error clearing retained posting {topic}: {err}"));
            }
        }

        self.reporter.progress(
            ProgressLevel::Detailed,
            format!("Cleared {} retained postings.", topics.len()),
        );
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    pending_fetches: Arc<Mutex<HashMap<String, Vec<oneshot::Sender<Vec<u8>>>>>>,
    sweeps: Arc<Mutex<Vec<SweepCollector>>>,
    reporter: Arc<Reporter>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                reporter.progress(ProgressLevel::Basic, "Connected to the MQTT broker.");
                if let Some(ready) = ready.take() {
                    let _ = ready.send(());
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatch(&subscriptions, &pending_fetches, &sweeps, publish).await;
            }
            Ok(_) => {}
            Err(err) if ready.is_some() => {
                reporter.error(format!("Error connecting to the MQTT broker: {err}"));
                reporter.progress(
                    ProgressLevel::Basic,
                    "Trying to connect to the MQTT broker...",
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(err) => {
                // A lost session means lost retained messages; the state
                // machines cannot be trusted afterwards.
                reporter.fatal(format!("MQTT connection lost: {err}."));
            }
        }
    }
}

async fn dispatch(
    subscriptions: &RwLock<Vec<Subscription>>,
    pending_fetches: &Mutex<HashMap<String, Vec<oneshot::Sender<Vec<u8>>>>>,
    sweeps: &Mutex<Vec<SweepCollector>>,
    publish: Publish,
) {
    let topic = publish.topic.clone();

    if publish.retain {
        for sweep in sweeps.lock().unwrap().iter() {
            if topic_filter_matches(&sweep.filter, &topic) {
                let _ = sweep.topics.send(topic.clone());
            }
        }
    }

    if let Some(waiters) = pending_fetches.lock().unwrap().remove(&topic) {
        for waiter in waiters {
            let _ = waiter.send(publish.payload.to_vec());
        }
    }

    let handlers: Vec<Arc<dyn MessageHandler>> = subscriptions
        .read()
        .await
        .iter()
        .filter(|subscription| topic_filter_matches(&subscription.filter, &topic))
        .map(|subscription| Arc::clone(&subscription.handler))
        .collect();

    for handler in handlers {
        let payload = publish.payload.clone();
        // Handlers may block on repository transfers; keep them off the
        // event-loop task and serial per delivery.
        let delivered = tokio::task::spawn_blocking(move || handler.on_message(&payload)).await;
        if delivered.is_err() {
            debug!(topic = %topic, "subscription handler panicked");
        }
    }
}

/// MQTT-style topic filter matching, segment by segment. `+` matches one
/// segment, `#` matches the rest.
fn topic_filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_segments = filter.split('/');
    let mut topic_segments = topic.split('/');

    loop {
        match (filter_segments.next(), topic_segments.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        assert!(topic_filter_matches("a/b/c", "a/b/c"));
        assert!(topic_filter_matches("a/+/c", "a/b/c"));
        assert!(topic_filter_matches("a/#", "a/b/c"));
        assert!(topic_filter_matches("#", "anything/at/all"));
        assert!(!topic_filter_matches("a/+/c", "a/b/d"));
        assert!(!topic_filter_matches("a/b", "a/b/c"));
        assert!(!topic_filter_matches("a/b/c", "a/b"));
    }

    #[test]
    fn test_wildcard_agent_listening() {
        let filter = "bus/bus-version-1.0/exp-7/+/artefacts/json/m1/v1/state";
        assert!(topic_filter_matches(
            filter,
            "bus/bus-version-1.0/exp-7/agent-b/artefacts/json/m1/v1/state"
        ));
        assert!(!topic_filter_matches(
            filter,
            "bus/bus-version-1.0/other/agent-b/artefacts/json/m1/v1/state"
        ));
    }

    #[test]
    fn test_payload_size_bound() {
        assert!(event_payload_allowed(&[0u8; MAX_EVENT_PAYLOAD_SIZE]));
        assert!(!event_payload_allowed(&[0u8; MAX_EVENT_PAYLOAD_SIZE + 1]));
    }
}
