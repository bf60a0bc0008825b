//! Topic-path grammar
//!
//! Every posting lives on a topic path shared by the event channel and the
//! repository:
//!
//! ```text
//! <prefix>/<busVersion>/<experimentID>/<agentID>/<kind>
//! kind ::= "artefacts/raw/" <artefactID>
//!        | "artefacts/json/" <artefactID> "/" <jsonVersion> "/" ("state"|"update"|"considering")
//!        | "observations/raw/" <observationID>
//!        | "observations/json/" <observationID>
//!        | "observations/streamed/" <observationID>
//! ```
//!
//! The functions here build the `<kind>` part; the transport connectors
//! prepend their own roots. Listeners may substitute [`ANY_AGENT`] for the
//! agent segment to listen across agents within an experiment.

/// Version tag of the modelling bus wire contract.
pub const BUS_VERSION: &str = "bus-version-1.0";

/// Fixed name of the payload file stored under each topic path.
pub const PAYLOAD_FILE_NAME: &str = "payload";

/// Extension for temporary local JSON files.
pub const JSON_EXTENSION: &str = ".json";

/// Name of the temporary local file used to stage JSON uploads/downloads.
pub const JSON_FILE_NAME: &str = "message.json";

/// Wildcard agent segment for listening across all agents of an experiment.
pub const ANY_AGENT: &str = "+";

const RAW_ARTEFACTS_ELEMENT: &str = "artefacts/raw";
const JSON_ARTEFACTS_ELEMENT: &str = "artefacts/json";
const RAW_OBSERVATIONS_ELEMENT: &str = "observations/raw";
const JSON_OBSERVATIONS_ELEMENT: &str = "observations/json";
const STREAMED_OBSERVATIONS_ELEMENT: &str = "observations/streamed";

/// The three synchronized views of a JSON artefact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtefactView {
    State,
    Update,
    Considering,
}

impl ArtefactView {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtefactView::State => "state",
            ArtefactView::Update => "update",
            ArtefactView::Considering => "considering",
        }
    }

    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "state" => Some(ArtefactView::State),
            "update" => Some(ArtefactView::Update),
            "considering" => Some(ArtefactView::Considering),
            _ => None,
        }
    }
}

/// Topic root for an experiment: `<prefix>/<busVersion>/<experimentID>`.
pub fn experiment_root(prefix: &str, experiment_id: &str) -> String {
    format!("{}/{}/{}", prefix, BUS_VERSION, experiment_id)
}

/// Topic root for one agent within an experiment.
pub fn agent_root(prefix: &str, experiment_id: &str, agent_id: &str) -> String {
    format!("{}/{}", experiment_root(prefix, experiment_id), agent_id)
}

pub fn raw_artefact_topic(artefact_id: &str) -> String {
    format!("{}/{}", RAW_ARTEFACTS_ELEMENT, artefact_id)
}

pub fn json_artefact_topic(artefact_id: &str, json_version: &str) -> String {
    format!("{}/{}/{}", JSON_ARTEFACTS_ELEMENT, artefact_id, json_version)
}

pub fn json_artefact_view_topic(artefact_id: &str, json_version: &str, view: ArtefactView) -> String {
    format!(
        "{}/{}",
        json_artefact_topic(artefact_id, json_version),
        view.as_str()
    )
}

pub fn raw_observation_topic(observation_id: &str) -> String {
    format!("{}/{}", RAW_OBSERVATIONS_ELEMENT, observation_id)
}

pub fn json_observation_topic(observation_id: &str) -> String {
    format!("{}/{}", JSON_OBSERVATIONS_ELEMENT, observation_id)
}

pub fn streamed_observation_topic(observation_id: &str) -> String {
    format!("{}/{}", STREAMED_OBSERVATIONS_ELEMENT, observation_id)
}

/// A decoded `<kind>` part of a topic path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind<'a> {
    RawArtefact {
        artefact_id: &'a str,
    },
    JsonArtefact {
        artefact_id: &'a str,
        json_version: &'a str,
        view: ArtefactView,
    },
    RawObservation {
        observation_id: &'a str,
    },
    JsonObservation {
        observation_id: &'a str,
    },
    StreamedObservation {
        observation_id: &'a str,
    },
}

fn is_id_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('/')
}

/// Decode the `<kind>` part of a topic path. Returns `None` for paths that
/// do not conform to the grammar, which keeps every constructed path
/// uniquely decodable.
pub fn parse_topic(topic_path: &str) -> Option<TopicKind<'_>> {
    let segments: Vec<&str> = topic_path.split('/').collect();
    match segments.as_slice() {
        ["artefacts", "raw", artefact_id] if is_id_segment(artefact_id) => {
            Some(TopicKind::RawArtefact { artefact_id })
        }
        ["artefacts", "json", artefact_id, json_version, view]
            if is_id_segment(artefact_id) && is_id_segment(json_version) =>
        {
            Some(TopicKind::JsonArtefact {
                artefact_id,
                json_version,
                view: ArtefactView::parse(view)?,
            })
        }
        ["observations", "raw", observation_id] if is_id_segment(observation_id) => {
            Some(TopicKind::RawObservation { observation_id })
        }
        ["observations", "json", observation_id] if is_id_segment(observation_id) => {
            Some(TopicKind::JsonObservation { observation_id })
        }
        ["observations", "streamed", observation_id] if is_id_segment(observation_id) => {
            Some(TopicKind::StreamedObservation { observation_id })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artefact_view_topics() {
        assert_eq!(
            json_artefact_view_topic("model-1", "cdm-1.0-1.0", ArtefactView::State),
            "artefacts/json/model-1/cdm-1.0-1.0/state"
        );
        assert_eq!(
            json_artefact_view_topic("model-1", "cdm-1.0-1.0", ArtefactView::Considering),
            "artefacts/json/model-1/cdm-1.0-1.0/considering"
        );
    }

    #[test]
    fn test_roots() {
        assert_eq!(
            agent_root("lab", "exp-7", "agent-a"),
            "lab/bus-version-1.0/exp-7/agent-a"
        );
        assert_eq!(experiment_root("lab", "exp-7"), "lab/bus-version-1.0/exp-7");
    }

    #[test]
    fn test_every_kind_round_trips() {
        let artefact_paths = [
            (
                raw_artefact_topic("a1"),
                TopicKind::RawArtefact { artefact_id: "a1" },
            ),
            (
                json_artefact_view_topic("a1", "v1", ArtefactView::Update),
                TopicKind::JsonArtefact {
                    artefact_id: "a1",
                    json_version: "v1",
                    view: ArtefactView::Update,
                },
            ),
            (
                raw_observation_topic("o1"),
                TopicKind::RawObservation { observation_id: "o1" },
            ),
            (
                json_observation_topic("o1"),
                TopicKind::JsonObservation { observation_id: "o1" },
            ),
            (
                streamed_observation_topic("o1"),
                TopicKind::StreamedObservation { observation_id: "o1" },
            ),
        ];

        for (path, expected) in artefact_paths {
            assert_eq!(parse_topic(&path).expect("decodable"), expected, "{path}");
        }
    }

    #[test]
    fn test_malformed_paths_rejected() {
        assert!(parse_topic("artefacts/json/a1/v1/merge").is_none());
        assert!(parse_topic("artefacts/raw").is_none());
        assert!(parse_topic("observations/raw/").is_none());
        assert!(parse_topic("somewhere/else").is_none());
    }
}
