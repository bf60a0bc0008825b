//! Artefact connector
//!
//! Manages one named, versioned JSON artefact on the modelling bus. Each
//! artefact keeps three synchronized views:
//!
//! - **current** — the last fully posted state, anchored by a monotonic
//!   current timestamp stamped by the posting agent;
//! - **updated** — a proposed next state, expressed as a delta from current;
//! - **considered** — a hypothetical variation, a delta from updated.
//!
//! Updated and considered are only meaningful relative to a specific
//! current: whenever current changes, both snap back to equal it. Deltas
//! travel as RFC 6902 patches framed with the sender's current timestamp;
//! a receiver whose anchor disagrees drops the delta without touching its
//! views. Divergence is surfaced by delta rejection, never merged.
//!
//! Before any update or considering delta goes out, a state posting at the
//! same current timestamp must have been published; the post operations
//! enforce this by auto-issuing the state themselves.

use crate::bus::{BusConnector, FilePostingHandler, PayloadHandler};
use crate::error::BusError;
use crate::json_ops;
use crate::report::ProgressLevel;
use crate::topic::{self, ArtefactView};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A posted difference between two artefact views: an RFC 6902 patch plus
/// its own posting time and the current-state anchor it was computed
/// against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDelta {
    pub operations: Value,
    pub timestamp: String,
    #[serde(rename = "current timestamp")]
    pub current_timestamp: String,
}

/// Outcome of offering a received delta to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeltaOutcome {
    Applied,
    /// The delta was anchored at a different current timestamp; the views
    /// were left untouched. Not an error for the user.
    AnchorMismatch,
}

/// The three synchronized views plus their anchoring state.
pub(crate) struct ArtefactState {
    pub current: Value,
    pub updated: Value,
    pub considered: Value,
    pub current_timestamp: String,
    pub state_communicated: bool,
}

impl ArtefactState {
    pub fn new(initial_timestamp: String) -> Self {
        Self {
            current: Value::Null,
            updated: Value::Null,
            considered: Value::Null,
            current_timestamp: initial_timestamp,
            state_communicated: false,
        }
    }

    /// Adopt a full state: all three views snap to it and the anchor moves.
    pub fn record_state(&mut self, state: Value, current_timestamp: String) {
        self.current = state.clone();
        self.updated = state.clone();
        self.considered = state;
        self.current_timestamp = current_timestamp;
    }

    /// Stage a proposed update: move updated (and considered, which snaps
    /// to it) to the new state and describe the move as a delta from
    /// current. Requires a communicated state.
    pub fn stage_update(&mut self, new_state: Value) -> Result<(Value, String), BusError> {
        let operations = json_ops::diff(&self.current, &new_state)?;
        self.updated = new_state.clone();
        self.considered = new_state;
        Ok((operations, self.current_timestamp.clone()))
    }

    /// Stage a considered variation: move considered to the new state and
    /// describe the move as a delta from updated.
    pub fn stage_considering(&mut self, new_state: Value) -> Result<(Value, String), BusError> {
        let operations = json_ops::diff(&self.updated, &new_state)?;
        self.considered = new_state;
        Ok((operations, self.current_timestamp.clone()))
    }

    /// Apply a received update delta against current. On success, updated
    /// takes the patched value and considered snaps to it.
    pub fn apply_update_delta(&mut self, delta: &JsonDelta) -> Result<DeltaOutcome, BusError> {
        if delta.current_timestamp != self.current_timestamp {
            return Ok(DeltaOutcome::AnchorMismatch);
        }

        let patched = json_ops::apply_patch(&self.current, &delta.operations)?;
        self.updated = patched.clone();
        self.considered = patched;
        Ok(DeltaOutcome::Applied)
    }

    /// Apply a received considering delta against updated. On success,
    /// considered takes the patched value.
    pub fn apply_considering_delta(&mut self, delta: &JsonDelta) -> Result<DeltaOutcome, BusError> {
        if delta.current_timestamp != self.current_timestamp {
            return Ok(DeltaOutcome::AnchorMismatch);
        }

        let patched = json_ops::apply_patch(&self.updated, &delta.operations)?;
        self.considered = patched;
        Ok(DeltaOutcome::Applied)
    }
}

/// Single-method capability notified when an artefact posting has been
/// folded into the connector's views.
pub trait ArtefactHandler: Send + Sync {
    fn on_posting(&self, artefact: &ArtefactConnector);
}

impl<F> ArtefactHandler for F
where
    F: Fn(&ArtefactConnector) + Send + Sync,
{
    fn on_posting(&self, artefact: &ArtefactConnector) {
        self(artefact)
    }
}

struct ArtefactInner {
    bus: Arc<BusConnector>,
    artefact_id: String,
    json_version: String,
    state: Mutex<ArtefactState>,
}

/// Connector for one artefact, identified by `(artefactID, jsonVersion)`
/// within the bus connector's experiment. Exclusively owns its three views;
/// holds a non-owning handle on the shared bus connector.
///
/// The connector is a cheap-clone handle: clones share the same views.
/// Views are mutated from the subscription callbacks and from the posting
/// thread; both paths serialise on the internal lock.
#[derive(Clone)]
pub struct ArtefactConnector {
    inner: Arc<ArtefactInner>,
}

impl ArtefactConnector {
    pub fn new(bus: Arc<BusConnector>, json_version: &str, artefact_id: &str) -> Self {
        let initial_timestamp = bus.timestamp();
        Self {
            inner: Arc::new(ArtefactInner {
                bus,
                artefact_id: artefact_id.to_string(),
                json_version: json_version.to_string(),
                state: Mutex::new(ArtefactState::new(initial_timestamp)),
            }),
        }
    }

    fn bus(&self) -> &BusConnector {
        &self.inner.bus
    }

    fn state(&self) -> &Mutex<ArtefactState> {
        &self.inner.state
    }

    pub fn artefact_id(&self) -> &str {
        &self.inner.artefact_id
    }

    pub fn json_version(&self) -> &str {
        &self.inner.json_version
    }

    /// The last fully posted state.
    pub fn current_content(&self) -> Value {
        self.state().lock().unwrap().current.clone()
    }

    /// The proposed next state.
    pub fn updated_content(&self) -> Value {
        self.state().lock().unwrap().updated.clone()
    }

    /// The hypothetical variation of the proposed state.
    pub fn considered_content(&self) -> Value {
        self.state().lock().unwrap().considered.clone()
    }

    /// The anchor pinning update/considering deltas to a state snapshot.
    pub fn current_timestamp(&self) -> String {
        self.state().lock().unwrap().current_timestamp.clone()
    }

    /*
     * Topic paths
     */

    fn raw_topic(&self) -> String {
        topic::raw_artefact_topic(self.artefact_id())
    }

    fn view_topic(&self, view: ArtefactView) -> String {
        topic::json_artefact_view_topic(self.artefact_id(), self.json_version(), view)
    }

    /*
     * Posting
     */

    fn parse_posted_json(&self, json: &[u8]) -> Option<Value> {
        match serde_json::from_slice(json) {
            Ok(value) => Some(value),
            Err(err) => {
                self.bus()
                    .reporter()
                    .error(format!("Provided content is not valid JSON: {err}"));
                None
            }
        }
    }

    async fn post_delta(&self, view: ArtefactView, operations: Value, anchor: String) {
        let delta = JsonDelta {
            operations,
            timestamp: self.bus().timestamp(),
            current_timestamp: anchor,
        };

        let encoded = match serde_json::to_vec(&delta) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.bus()
                    .reporter()
                    .error(format!("Something went wrong encoding the delta: {err}"));
                return;
            }
        };

        self.bus()
            .post_json_as_file(&self.view_topic(view), &encoded, &delta.timestamp)
            .await;
    }

    /// Post a full artefact state. All three views snap to it, the anchor
    /// moves to a fresh timestamp, and the state travels as a repository
    /// file announced on the `state` topic.
    pub async fn post_state(&self, state_json: &[u8]) {
        let Some(state) = self.parse_posted_json(state_json) else {
            return;
        };

        let timestamp = self.bus().timestamp();
        {
            let mut views = self.state().lock().unwrap();
            views.record_state(state, timestamp.clone());
            views.state_communicated = true;
        }

        self.bus()
            .post_json_as_file(&self.view_topic(ArtefactView::State), state_json, &timestamp)
            .await;
    }

    /// Post a proposed update as a delta from the current state. Without a
    /// previously communicated state, the update content is posted as the
    /// state instead.
    pub async fn post_update(&self, updated_json: &[u8]) {
        let Some(updated) = self.parse_posted_json(updated_json) else {
            return;
        };

        let staged = {
            let mut views = self.state().lock().unwrap();
            if views.state_communicated {
                Some(views.stage_update(updated))
            } else {
                None
            }
        };

        match staged {
            None => self.post_state(updated_json).await,
            Some(Ok((operations, anchor))) => {
                self.post_delta(ArtefactView::Update, operations, anchor).await
            }
            Some(Err(err)) => self
                .bus()
                .reporter()
                .error(format!("Something went wrong computing the update delta: {err}")),
        }
    }

    /// Post a considered variation as a delta from the updated state.
    /// Without a previously communicated state, the current content is
    /// posted as the state first.
    pub async fn post_considering(&self, considering_json: &[u8]) {
        let Some(considering) = self.parse_posted_json(considering_json) else {
            return;
        };

        let needs_state = {
            let views = self.state().lock().unwrap();
            if views.state_communicated {
                None
            } else {
                Some(views.current.clone())
            }
        };
        if let Some(current) = needs_state {
            match serde_json::to_vec(&current) {
                Ok(current_json) => self.post_state(&current_json).await,
                Err(err) => {
                    self.bus()
                        .reporter()
                        .error(format!("Something went wrong encoding the current state: {err}"));
                    return;
                }
            }
        }

        let staged = self.state().lock().unwrap().stage_considering(considering);
        match staged {
            Ok((operations, anchor)) => {
                self.post_delta(ArtefactView::Considering, operations, anchor)
                    .await
            }
            Err(err) => self
                .bus()
                .reporter()
                .error(format!("Something went wrong computing the considering delta: {err}")),
        }
    }

    /// Post an opaque raw artefact file; no diffing is involved.
    pub async fn post_raw_state(&self, local_file_path: &Path) {
        let timestamp = self.bus().timestamp();
        self.bus()
            .post_file(&self.raw_topic(), local_file_path, &timestamp)
            .await;
    }

    /*
     * Receiving
     */

    fn receive_state(&self, payload: &[u8], current_timestamp: &str) -> bool {
        let Ok(state) = serde_json::from_slice::<Value>(payload) else {
            return false;
        };
        self.state()
            .lock()
            .unwrap()
            .record_state(state, current_timestamp.to_string());
        true
    }

    fn receive_delta(&self, view: ArtefactView, payload: &[u8]) -> bool {
        let Ok(delta) = serde_json::from_slice::<JsonDelta>(payload) else {
            return false;
        };

        let applied = {
            let mut views = self.state().lock().unwrap();
            match view {
                ArtefactView::Update => views.apply_update_delta(&delta),
                ArtefactView::Considering => views.apply_considering_delta(&delta),
                ArtefactView::State => return false,
            }
        };

        match applied {
            Ok(DeltaOutcome::Applied) => true,
            Ok(DeltaOutcome::AnchorMismatch) => {
                self.bus().reporter().progress(
                    ProgressLevel::Noisy,
                    format!(
                        "Dropping a delta anchored at {}; current anchor differs.",
                        delta.current_timestamp
                    ),
                );
                false
            }
            Err(err) => {
                self.bus()
                    .reporter()
                    .error(format!("Applying the received delta did not work: {err}"));
                false
            }
        }
    }

    /*
     * Listening
     */

    /// Listen for state postings of this artefact from the given agent (or
    /// [`crate::topic::ANY_AGENT`]). On each accepted state, all views
    /// snap to it before the handler runs.
    pub async fn listen_for_state_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn ArtefactHandler>,
    ) {
        let artefact = self.clone();
        let on_payload: Arc<dyn PayloadHandler> = Arc::new(move |payload: &[u8], ts: &str| {
            if artefact.receive_state(payload, ts) {
                handler.on_posting(&artefact);
            }
        });
        self.bus()
            .listen_for_json_file_postings(agent_id, &self.view_topic(ArtefactView::State), on_payload)
            .await;
    }

    /// Listen for update deltas. The handler only runs when a delta was
    /// actually applied; mismatched anchors are dropped silently.
    pub async fn listen_for_update_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn ArtefactHandler>,
    ) {
        let artefact = self.clone();
        let on_payload: Arc<dyn PayloadHandler> = Arc::new(move |payload: &[u8], _ts: &str| {
            if artefact.receive_delta(ArtefactView::Update, payload) {
                handler.on_posting(&artefact);
            }
        });
        self.bus()
            .listen_for_json_file_postings(agent_id, &self.view_topic(ArtefactView::Update), on_payload)
            .await;
    }

    /// Listen for considering deltas, applied against the updated view.
    pub async fn listen_for_considering_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn ArtefactHandler>,
    ) {
        let artefact = self.clone();
        let on_payload: Arc<dyn PayloadHandler> = Arc::new(move |payload: &[u8], _ts: &str| {
            if artefact.receive_delta(ArtefactView::Considering, payload) {
                handler.on_posting(&artefact);
            }
        });
        self.bus()
            .listen_for_json_file_postings(
                agent_id,
                &self.view_topic(ArtefactView::Considering),
                on_payload,
            )
            .await;
    }

    /// Listen for raw artefact postings; the handler receives the local
    /// path of each materialised file.
    pub async fn listen_for_raw_state_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn FilePostingHandler>,
    ) {
        let local_file_name = format!("{}.raw", self.artefact_id());
        self.bus()
            .listen_for_file_postings(agent_id, &self.raw_topic(), &local_file_name, handler)
            .await;
    }

    /*
     * Synchronous gets
     */

    /// Fetch the retained state posting and adopt it, giving a
    /// point-in-time view without subscribing.
    pub async fn get_state(&self, agent_id: &str) {
        if let Some((payload, timestamp)) = self
            .bus()
            .get_json(agent_id, &self.view_topic(ArtefactView::State))
            .await
        {
            self.receive_state(&payload, &timestamp);
        }
    }

    /// Fetch the retained state and update postings and fold them in.
    pub async fn get_update(&self, agent_id: &str) {
        self.get_state(agent_id).await;
        if let Some((payload, _)) = self
            .bus()
            .get_json(agent_id, &self.view_topic(ArtefactView::Update))
            .await
        {
            self.receive_delta(ArtefactView::Update, &payload);
        }
    }

    /// Fetch the retained state, update, and considering postings and fold
    /// them in.
    pub async fn get_considering(&self, agent_id: &str) {
        self.get_update(agent_id).await;
        if let Some((payload, _)) = self
            .bus()
            .get_json(agent_id, &self.view_topic(ArtefactView::Considering))
            .await
        {
            self.receive_delta(ArtefactView::Considering, &payload);
        }
    }

    /// Fetch the retained raw artefact posting into the work folder.
    pub async fn get_raw(&self, agent_id: &str, local_file_name: &str) -> Option<(PathBuf, String)> {
        self.bus()
            .get_file_from_posting(agent_id, &self.raw_topic(), local_file_name)
            .await
    }

    /*
     * Deleting
     */

    /// Delete the raw artefact posting; the topic path is derived from the
    /// connector's own artefact ID.
    pub async fn delete_raw(&self) {
        self.bus().delete_posting(&self.raw_topic()).await;
    }

    /// Delete the JSON artefact: state, update, and considering postings.
    pub async fn delete_json(&self) {
        self.bus()
            .delete_posting(&self.view_topic(ArtefactView::State))
            .await;
        self.bus()
            .delete_posting(&self.view_topic(ArtefactView::Update))
            .await;
        self.bus()
            .delete_posting(&self.view_topic(ArtefactView::Considering))
            .await;
    }
}
