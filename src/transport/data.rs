//! Generic data envelope.
//!
//! [`DataTransport`] is the base layer of the protocol: a command, a
//! correlation id, free-form JSON parameters and a map of named buffers. Every
//! other envelope type wraps one.

use std::{collections::BTreeMap, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use super::{
    buffer::{deep_copy, validate_attribute, SharedBuffer, TransferList},
    Envelope, Transport, TransportMain,
};
use crate::error::TransportError;

/// Type discriminator of a plain data envelope.
pub const DATA_TRANSPORT_TYPE: &str = "DataTransport";

/// Generic message wrapper.
///
/// # Examples
/// ```ignore
/// let mut message = DataTransport::new(cmd::EXECUTE, 1);
/// message
///     .set_param("fileName", "cube.obj")?
///     .add_buffer("payload", TypedArray::from(bytes))?;
/// let envelope = message.into_envelope()?;
/// ```
#[derive(Debug, Clone)]
pub struct DataTransport {
    main: TransportMain,
    buffers: BTreeMap<String, Option<SharedBuffer>>,
    transferables: Vec<SharedBuffer>,
    packaged: bool,
}

impl DataTransport {
    /// Creates an empty envelope.
    ///
    /// # Arguments
    /// * `cmd` - Command name
    /// * `id` - Correlation id
    pub fn new(cmd: &str, id: u64) -> Self {
        Self::with_type(cmd, id, Self::TYPE_NAME)
    }

    pub(crate) fn with_type(cmd: &str, id: u64, type_name: &str) -> Self {
        Self {
            main: TransportMain::new(cmd, id, type_name),
            buffers: BTreeMap::new(),
            transferables: Vec::new(),
            packaged: false,
        }
    }

    /// The JSON-safe half as it stands.
    pub fn main(&self) -> &TransportMain {
        &self.main
    }

    /// Command name.
    pub fn cmd(&self) -> &str {
        &self.main.cmd
    }

    /// Replaces the command name.
    pub fn set_cmd(&mut self, cmd: &str) -> &mut Self {
        self.main.cmd = cmd.to_string();
        self
    }

    /// Correlation id.
    pub fn id(&self) -> u64 {
        self.main.id
    }

    /// Replaces the correlation id.
    pub fn set_id(&mut self, id: u64) -> &mut Self {
        self.main.id = id;
        self
    }

    /// Type discriminator.
    pub fn type_name(&self) -> &str {
        &self.main.type_name
    }

    /// Progress in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.main.progress
    }

    /// Sets the progress, clamped into `[0, 1]`.
    pub fn set_progress(&mut self, progress: f32) -> Result<&mut Self, TransportError> {
        if !progress.is_finite() {
            return Err(TransportError::InvalidProgress(progress));
        }
        self.main.progress = progress.clamp(0.0, 1.0);
        Ok(self)
    }

    /// All parameters.
    pub fn params(&self) -> &Map<String, Value> {
        &self.main.params
    }

    /// Replaces all parameters.
    pub fn set_params(&mut self, params: Map<String, Value>) -> &mut Self {
        self.main.params = params;
        self
    }

    /// Sets a single parameter from any serializable value.
    pub fn set_param<V: Serialize>(
        &mut self,
        name: &str,
        value: V,
    ) -> Result<&mut Self, TransportError> {
        self.main
            .params
            .insert(name.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// A single parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.main.params.get(name)
    }

    /// A single parameter deserialized into `T`.
    pub fn param_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, TransportError> {
        let value = self
            .main
            .params
            .get(name)
            .ok_or_else(|| TransportError::MissingParam(name.to_string()))?;
        Ok(T::deserialize(value)?)
    }

    /// Adds a named buffer.
    ///
    /// Standard attribute names are checked against their fixed stride, and
    /// `index` against its integer element type.
    pub fn add_buffer(
        &mut self,
        name: &str,
        buffer: impl Into<SharedBuffer>,
    ) -> Result<&mut Self, TransportError> {
        let buffer = buffer.into();
        validate_attribute(name, &buffer)?;
        self.buffers.insert(name.to_string(), Some(buffer));
        self.packaged = false;
        Ok(self)
    }

    /// Records a buffer name as explicitly absent.
    ///
    /// Absent buffers are sent as `null` placeholders, never as empty arrays.
    pub fn set_null_buffer(&mut self, name: &str) -> &mut Self {
        self.buffers.insert(name.to_string(), None);
        self.packaged = false;
        self
    }

    /// A named buffer, `None` when absent or never added.
    pub fn buffer(&self, name: &str) -> Option<&SharedBuffer> {
        self.buffers.get(name).and_then(Option::as_ref)
    }

    /// Names of all buffer entries, including `null` ones.
    pub fn buffer_names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    /// Buffers listed by the last `package` call.
    pub fn transferables(&self) -> &[SharedBuffer] {
        &self.transferables
    }

    /// Clones the envelope.
    ///
    /// # Arguments
    /// * `clone_buffers` - Duplicate the underlying buffers instead of sharing
    ///   them with the original
    pub fn duplicate(&self, clone_buffers: bool) -> Self {
        let mut copy = self.clone();
        copy.transferables.clear();
        copy.packaged = false;

        if clone_buffers {
            let mut copies: Vec<(SharedBuffer, SharedBuffer)> = Vec::new();
            for buffer in copy.buffers.values_mut().flatten() {
                let duplicate = match copies.iter().find(|(org, _)| Arc::ptr_eq(org, buffer)) {
                    Some((_, duplicate)) => duplicate.clone(),
                    None => {
                        let duplicate = deep_copy(buffer);
                        copies.push((buffer.clone(), duplicate.clone()));
                        duplicate
                    }
                };
                *buffer = duplicate;
            }
        }
        copy
    }

    /// Writes slot indices into `main.buffers` using a shared transfer list.
    pub(crate) fn package_into(&mut self, list: &mut TransferList, clone_buffers: bool) {
        self.main.buffers = self
            .buffers
            .iter()
            .map(|(name, buffer)| {
                let slot = buffer
                    .as_ref()
                    .map(|buffer| list.push(buffer, clone_buffers));
                (name.clone(), slot)
            })
            .collect();
    }

    pub(crate) fn set_transferables(&mut self, transferables: Vec<SharedBuffer>) {
        self.transferables = transferables;
        self.packaged = true;
    }

    /// Resolves `main.buffers` against a received transferable list.
    pub(crate) fn from_parts(
        main: TransportMain,
        transferables: &[SharedBuffer],
    ) -> Result<Self, TransportError> {
        let mut buffers = BTreeMap::new();
        for (name, slot) in &main.buffers {
            let buffer = match slot {
                Some(slot) => Some(transferables.get(*slot).cloned().ok_or_else(|| {
                    TransportError::MissingTransferable {
                        name: name.clone(),
                        slot: *slot,
                        available: transferables.len(),
                    }
                })?),
                None => None,
            };
            buffers.insert(name.clone(), buffer);
        }

        Ok(Self {
            main,
            buffers,
            transferables: Vec::new(),
            packaged: false,
        })
    }

    pub(crate) fn expect_type(&self, expected: &str) -> Result<(), TransportError> {
        if self.main.type_name == expected {
            Ok(())
        } else {
            Err(TransportError::UnexpectedType {
                expected: expected.to_string(),
                found: self.main.type_name.clone(),
            })
        }
    }
}

impl Transport for DataTransport {
    const TYPE_NAME: &'static str = DATA_TRANSPORT_TYPE;

    fn data(&self) -> &DataTransport {
        self
    }

    fn data_mut(&mut self) -> &mut DataTransport {
        self
    }

    fn package(&mut self, clone_buffers: bool) -> Result<&mut Self, TransportError> {
        let mut list = TransferList::new();
        self.package_into(&mut list, clone_buffers);
        self.set_transferables(list.into_transferables());
        Ok(self)
    }

    fn into_envelope(mut self) -> Result<Envelope, TransportError> {
        if !self.packaged {
            self.package(false)?;
        }
        Ok(Envelope {
            main: self.main,
            transferables: self.transferables,
        })
    }

    /// Accepts any envelope type; this is the base view of every message.
    fn from_envelope(envelope: Envelope) -> Result<Self, TransportError> {
        Self::from_parts(envelope.main, &envelope.transferables)
    }
}
