//! # Transport Protocol
//!
//! Layered message envelopes used for every message exchanged with execution
//! contexts.
//!
//! ```text
//! DataTransport ──► GeometryTransport ──┐
//!       │                               ├──► MeshTransport
//!       └─────────► MaterialsTransport ─┘
//! ```
//!
//! Each layer owns a [`DataTransport`] rather than inheriting from it; a
//! [`MeshTransport`] owns one geometry and one materials envelope.
//!
//! ## Wire Format
//! An [`Envelope`] is split in two halves:
//! * `main` - the JSON-safe [`TransportMain`] (command, id, type, progress,
//!   parameters and buffer placeholders)
//! * `transferables` - the buffers referenced by `main.buffers`, each listed
//!   once and moved rather than copied
//!
//! ```text
//! { "cmd": "execute", "id": 7, "type": "GeometryTransport", "progress": 0.0,
//!   "params": { "geometryType": 0 },
//!   "buffers": { "position": 0, "normal": null, "index": 1 } }
//! ```

pub mod buffer;
pub mod data;
pub mod geometry;
pub mod materials;
pub mod mesh;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;

pub use buffer::{ElementKind, SharedBuffer, TransferList, TypedArray, ATTRIBUTE_STRIDES};
pub use data::DataTransport;
pub use geometry::{BufferAttribute, Geometry, GeometryGroup, GeometryTransport, GeometryType};
pub use materials::{
    Material, MaterialCache, MaterialCloneInstruction, MaterialStore, MaterialsTransport,
    ResolvedMaterials,
};
pub use mesh::{MeshParser, MeshTransport};

/// Command names exchanged between the main side and execution contexts.
pub mod cmd {
    /// Main → context: initialize with the attached configuration.
    pub const INIT: &str = "init";
    /// Context → main: initialization finished.
    pub const INIT_COMPLETE: &str = "initComplete";
    /// Main → context: run one invocation.
    pub const EXECUTE: &str = "execute";
    /// Context → main: partial result or progress of the running invocation.
    pub const INTERMEDIATE: &str = "intermediate";
    /// Context → main: terminal result of the running invocation.
    pub const EXEC_COMPLETE: &str = "execComplete";
    /// Context → main: the current message failed.
    pub const ERROR: &str = "error";
}

/// The JSON-safe half of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMain {
    /// Command name, see [`cmd`]
    pub cmd: String,
    /// Correlation id
    pub id: u64,
    /// Envelope type discriminator
    #[serde(rename = "type")]
    pub type_name: String,
    /// Progress of the invocation in `[0, 1]`
    #[serde(default)]
    pub progress: f32,
    /// Free-form parameters
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Buffer name → transferable slot, `None` for absent buffers
    #[serde(default)]
    pub buffers: BTreeMap<String, Option<usize>>,
}

impl TransportMain {
    /// Creates an empty main half.
    pub fn new(cmd: &str, id: u64, type_name: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            id,
            type_name: type_name.to_string(),
            progress: 0.0,
            params: Map::new(),
            buffers: BTreeMap::new(),
        }
    }
}

/// A packaged message ready to be posted.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// JSON-safe part
    pub main: TransportMain,
    /// Buffers moved with the message
    pub transferables: Vec<SharedBuffer>,
}

impl Envelope {
    /// A buffer-less control message.
    pub fn command(cmd: &str, id: u64) -> Self {
        Self {
            main: TransportMain::new(cmd, id, data::DATA_TRANSPORT_TYPE),
            transferables: Vec::new(),
        }
    }

    /// Command name.
    pub fn cmd(&self) -> &str {
        &self.main.cmd
    }

    /// Correlation id.
    pub fn id(&self) -> u64 {
        self.main.id
    }

    /// Type discriminator.
    pub fn type_name(&self) -> &str {
        &self.main.type_name
    }

    /// A single parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.main.params.get(name)
    }

    /// Serializes `main` to JSON.
    pub fn main_to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(&self.main)?)
    }

    /// Rebuilds an envelope from a JSON `main` and its transferables.
    pub fn from_json(
        main: &str,
        transferables: Vec<SharedBuffer>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            main: serde_json::from_str(main)?,
            transferables,
        })
    }
}

/// Common behavior of every envelope layer.
pub trait Transport: Sized {
    /// Type discriminator written to `main.type`.
    const TYPE_NAME: &'static str;

    /// The underlying data envelope.
    fn data(&self) -> &DataTransport;

    /// The underlying data envelope, mutably.
    fn data_mut(&mut self) -> &mut DataTransport;

    /// Finalizes `main` and the transferable list.
    ///
    /// # Arguments
    /// * `clone_buffers` - Send deep copies so the caller can keep using (or
    ///   re-send) its buffers
    fn package(&mut self, clone_buffers: bool) -> Result<&mut Self, TransportError>;

    /// Packages (when not done already) and converts into a postable envelope.
    fn into_envelope(self) -> Result<Envelope, TransportError>;

    /// Decodes a received envelope.
    fn from_envelope(envelope: Envelope) -> Result<Self, TransportError>;
}
