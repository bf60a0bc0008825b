//! Conceptual Domain Modelling language, version 1
//!
//! The CDM schema is data-only as far as the bus is concerned: models are
//! serialised to JSON here and travel as opaque artefact payloads. The
//! poster/listener pairs below are thin glue over the artefact connector.

use crate::artefact::{ArtefactConnector, ArtefactHandler};
use crate::bus::BusConnector;
use crate::timestamp::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// JSON version tag of CDM v1 models on the bus.
pub const CDM_JSON_VERSION: &str = "cdm-1.0-1.0";

/// One reading of a relation type: the involvement types it mentions,
/// interleaved with the reading's text elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationReading {
    #[serde(rename = "involvement types")]
    pub involvement_types: Vec<String>,
    #[serde(rename = "reading elements")]
    pub reading_elements: Vec<String>,
}

/// A CDM v1 model. Element IDs are timestamps issued by the posting agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CdmModel {
    #[serde(rename = "model name")]
    pub model_name: String,

    /// Names of all types, by their IDs.
    #[serde(rename = "type names")]
    pub type_names: HashMap<String, String>,

    #[serde(rename = "concrete individual types")]
    pub concrete_individual_types: HashSet<String>,

    #[serde(rename = "quality types")]
    pub quality_types: HashSet<String>,
    #[serde(rename = "domains of quality types")]
    pub domain_of_quality_type: HashMap<String, String>,

    #[serde(rename = "involvement types")]
    pub involvement_types: HashSet<String>,
    #[serde(rename = "base types of involvement types")]
    pub base_type_of_involvement_type: HashMap<String, String>,
    #[serde(rename = "relation types of involvement types")]
    pub relation_type_of_involvement_type: HashMap<String, String>,

    #[serde(rename = "relation types")]
    pub relation_types: HashSet<String>,
    #[serde(rename = "involvement types of relation types")]
    pub involvement_types_of_relation_type: HashMap<String, HashSet<String>>,
    #[serde(rename = "alternative readings of relation types")]
    pub alternative_readings_of_relation_type: HashMap<String, HashSet<String>>,
    #[serde(rename = "primary readings of relation types")]
    pub primary_reading_of_relation_type: HashMap<String, String>,
    #[serde(rename = "reading definition")]
    pub reading_definition: HashMap<String, RelationReading>,
}

impl CdmModel {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            ..Self::default()
        }
    }

    /// Reset every table of the model.
    pub fn clean(&mut self) {
        *self = Self::default();
    }

    pub fn set_model_name(&mut self, name: &str) {
        self.model_name = name.to_string();
    }

    pub fn add_concrete_individual_type(&mut self, clock: &Clock, name: &str) -> String {
        let id = clock.now();
        self.concrete_individual_types.insert(id.clone());
        self.type_names.insert(id.clone(), name.to_string());
        id
    }

    pub fn add_quality_type(&mut self, clock: &Clock, name: &str, domain: &str) -> String {
        let id = clock.now();
        self.quality_types.insert(id.clone());
        self.type_names.insert(id.clone(), name.to_string());
        self.domain_of_quality_type
            .insert(id.clone(), domain.to_string());
        id
    }

    pub fn add_relation_type(&mut self, clock: &Clock, name: &str) -> String {
        let id = clock.now();
        self.relation_types.insert(id.clone());
        self.type_names.insert(id.clone(), name.to_string());
        self.involvement_types_of_relation_type
            .insert(id.clone(), HashSet::new());
        self.alternative_readings_of_relation_type
            .insert(id.clone(), HashSet::new());
        id
    }

    /// Add an involvement type to a relation type.
    pub fn add_involvement_type(
        &mut self,
        clock: &Clock,
        name: &str,
        base_type_id: &str,
        relation_type_id: &str,
    ) -> String {
        let id = clock.now();
        self.involvement_types.insert(id.clone());
        self.type_names.insert(id.clone(), name.to_string());
        self.base_type_of_involvement_type
            .insert(id.clone(), base_type_id.to_string());
        self.relation_type_of_involvement_type
            .insert(id.clone(), relation_type_id.to_string());
        self.involvement_types_of_relation_type
            .entry(relation_type_id.to_string())
            .or_default()
            .insert(id.clone());
        id
    }

    /// Add a reading for a relation type; the first reading becomes the
    /// primary one.
    pub fn add_relation_reading(
        &mut self,
        clock: &Clock,
        relation_type_id: &str,
        reading: RelationReading,
    ) -> String {
        let id = clock.now();
        self.alternative_readings_of_relation_type
            .entry(relation_type_id.to_string())
            .or_default()
            .insert(id.clone());
        self.primary_reading_of_relation_type
            .entry(relation_type_id.to_string())
            .or_insert_with(|| id.clone());
        self.reading_definition.insert(id.clone(), reading);
        id
    }

    pub fn type_name(&self, type_id: &str) -> Option<&str> {
        self.type_names.get(type_id).map(String::as_str)
    }
}

/// Posts CDM models as JSON artefacts on the bus.
pub struct CdmModelPoster {
    artefacts: ArtefactConnector,
}

impl CdmModelPoster {
    pub fn new(bus: Arc<BusConnector>, model_id: &str) -> Self {
        Self {
            artefacts: ArtefactConnector::new(bus, CDM_JSON_VERSION, model_id),
        }
    }

    fn encoded(&self, model: &CdmModel) -> Option<Vec<u8>> {
        match serde_json::to_vec(model) {
            Ok(encoded) => Some(encoded),
            Err(_) => None,
        }
    }

    pub async fn post_state(&self, model: &CdmModel) {
        if let Some(encoded) = self.encoded(model) {
            self.artefacts.post_state(&encoded).await;
        }
    }

    pub async fn post_update(&self, model: &CdmModel) {
        if let Some(encoded) = self.encoded(model) {
            self.artefacts.post_update(&encoded).await;
        }
    }

    pub async fn post_considering(&self, model: &CdmModel) {
        if let Some(encoded) = self.encoded(model) {
            self.artefacts.post_considering(&encoded).await;
        }
    }
}

struct CdmModels {
    current: CdmModel,
    updated: CdmModel,
    considered: CdmModel,
}

struct CdmListenerInner {
    artefacts: ArtefactConnector,
    models: Mutex<CdmModels>,
}

/// Listens for CDM model postings and materialises the current, updated,
/// and considered models from the artefact views. Cheap-clone handle;
/// clones share the same models.
#[derive(Clone)]
pub struct CdmModelListener {
    inner: Arc<CdmListenerInner>,
}

impl CdmModelListener {
    pub fn new(bus: Arc<BusConnector>, model_id: &str) -> Self {
        Self {
            inner: Arc::new(CdmListenerInner {
                artefacts: ArtefactConnector::new(bus, CDM_JSON_VERSION, model_id),
                models: Mutex::new(CdmModels {
                    current: CdmModel::default(),
                    updated: CdmModel::default(),
                    considered: CdmModel::default(),
                }),
            }),
        }
    }

    pub fn current_model(&self) -> CdmModel {
        self.inner.models.lock().unwrap().current.clone()
    }

    pub fn updated_model(&self) -> CdmModel {
        self.inner.models.lock().unwrap().updated.clone()
    }

    pub fn considered_model(&self) -> CdmModel {
        self.inner.models.lock().unwrap().considered.clone()
    }

    fn model_from(view: Value) -> CdmModel {
        serde_json::from_value(view).unwrap_or_default()
    }

    fn refresh(&self) {
        let mut models = self.inner.models.lock().unwrap();
        models.current = Self::model_from(self.inner.artefacts.current_content());
        models.updated = Self::model_from(self.inner.artefacts.updated_content());
        models.considered = Self::model_from(self.inner.artefacts.considered_content());
    }

    async fn listen(
        &self,
        agent_id: &str,
        view: CdmListenKind,
        handler: Arc<dyn Fn(&CdmModelListener) + Send + Sync>,
    ) {
        let listener = self.clone();
        let on_posting: Arc<dyn ArtefactHandler> = Arc::new(move |_: &ArtefactConnector| {
            listener.refresh();
            handler(&listener);
        });

        match view {
            CdmListenKind::State => {
                self.inner
                    .artefacts
                    .listen_for_state_postings(agent_id, on_posting)
                    .await
            }
            CdmListenKind::Update => {
                self.inner
                    .artefacts
                    .listen_for_update_postings(agent_id, on_posting)
                    .await
            }
            CdmListenKind::Considering => {
                self.inner
                    .artefacts
                    .listen_for_considering_postings(agent_id, on_posting)
                    .await
            }
        }
    }

    pub async fn listen_for_state_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn Fn(&CdmModelListener) + Send + Sync>,
    ) {
        self.listen(agent_id, CdmListenKind::State, handler).await;
    }

    pub async fn listen_for_update_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn Fn(&CdmModelListener) + Send + Sync>,
    ) {
        self.listen(agent_id, CdmListenKind::Update, handler).await;
    }

    pub async fn listen_for_considering_postings(
        &self,
        agent_id: &str,
        handler: Arc<dyn Fn(&CdmModelListener) + Send + Sync>,
    ) {
        self.listen(agent_id, CdmListenKind::Considering, handler).await;
    }
}

enum CdmListenKind {
    State,
    Update,
    Considering,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_round_trips_through_json() {
        let clock = Clock::new();
        let mut model = CdmModel::new("logistics");

        let person = model.add_concrete_individual_type(&clock, "Person");
        let parcel = model.add_concrete_individual_type(&clock, "Parcel");
        let weight = model.add_quality_type(&clock, "Weight", &parcel);
        let carries = model.add_relation_type(&clock, "carries");
        let carrier = model.add_involvement_type(&clock, "carrier", &person, &carries);
        let carried = model.add_involvement_type(&clock, "carried", &parcel, &carries);
        model.add_relation_reading(
            &clock,
            &carries,
            RelationReading {
                involvement_types: vec![carrier.clone(), carried.clone()],
                reading_elements: vec!["".into(), " carries ".into(), "".into()],
            },
        );

        let encoded = serde_json::to_vec(&model).unwrap();
        let decoded: CdmModel = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, model);

        assert_eq!(decoded.type_name(&weight), Some("Weight"));
        assert!(decoded.concrete_individual_types.contains(&person));
        assert_eq!(
            decoded.involvement_types_of_relation_type[&carries].len(),
            2
        );
        assert_eq!(
            decoded.primary_reading_of_relation_type[&carries],
            *decoded.alternative_readings_of_relation_type[&carries]
                .iter()
                .next()
                .unwrap()
        );
    }

    #[test]
    fn test_field_names_follow_schema() {
        let model = CdmModel::new("m");
        let encoded = serde_json::to_value(&model).unwrap();
        let object = encoded.as_object().unwrap();
        assert!(object.contains_key("model name"));
        assert!(object.contains_key("type names"));
        assert!(object.contains_key("concrete individual types"));
        assert!(object.contains_key("reading definition"));
    }

    #[test]
    fn test_clean_resets_tables() {
        let clock = Clock::new();
        let mut model = CdmModel::new("m");
        model.add_concrete_individual_type(&clock, "Thing");
        model.clean();
        assert!(model.model_name.is_empty());
        assert!(model.concrete_individual_types.is_empty());
        assert!(model.type_names.is_empty());
    }
}
