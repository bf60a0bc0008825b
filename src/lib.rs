//! Modelling bus - publish/subscribe fabric for collaborating agents
//!
//! Agents exchange versioned *artefacts* (structured JSON models plus
//! opaque raw files) and *observations* over two combined transports: a
//! retained-pub/sub event channel (MQTT) for small notifications and an
//! FTP-based object repository for bulk payloads. A posting stores its
//! payload in the repository and announces it with a retained link event;
//! subscribers transparently follow the link.
//!
//! ## Layers
//!
//! | Layer | Module | Responsibility |
//! |-------|--------|----------------|
//! | 1 | [`events`] | Retained publish, QoS-1 subscribe, delete-by-publish-empty |
//! | 1 | [`repository`] | Upload/download/delete payload files under topic paths |
//! | 2 | [`bus`] | Compose both transports; inline vs. linked postings; deletes |
//! | 3 | [`artefact`] | Three-view artefact state machine over RFC 6902 deltas |
//! | 3 | [`observation`] | One-shot raw/JSON/streamed observations |
//!
//! The [`cdm`] module carries the Conceptual Domain Modelling schema whose
//! models travel as opaque JSON artefacts; [`config`], [`report`],
//! [`timestamp`], [`topic`], and [`json_ops`] supply the ambient pieces.
//!
//! ## Ordering model
//!
//! Timestamps are monotonic per agent and compare lexicographically; the
//! artefact protocol anchors every delta to the current-state timestamp it
//! was computed against. The bus guarantees no global ordering across
//! agents: concurrent updates at the same anchor are not merged, and a
//! stale delta simply fails its anchor check at the receiver.

pub mod artefact;
pub mod bus;
pub mod cdm;
pub mod config;
pub mod error;
pub mod events;
pub mod json_ops;
pub mod observation;
pub mod report;
pub mod repository;
pub mod timestamp;
pub mod topic;

pub use artefact::{ArtefactConnector, ArtefactHandler, JsonDelta};
pub use bus::{BusConnector, FilePostingHandler, PayloadHandler, StreamedEvent};
pub use config::BusConfig;
pub use error::BusError;
pub use events::{event_payload_allowed, MessageHandler, MAX_EVENT_PAYLOAD_SIZE};
pub use observation::ObservationConnector;
pub use report::{ProgressLevel, Reporter};
pub use repository::RepositoryEvent;
pub use timestamp::Clock;
pub use topic::{ArtefactView, ANY_AGENT, BUS_VERSION};
