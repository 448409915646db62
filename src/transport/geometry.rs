//! Geometry envelope.
//!
//! [`GeometryTransport`] carries the standard vertex attribute slots of a
//! [`Geometry`] plus a [`GeometryType`] telling the receiver which primitive
//! to build. Absent slots travel as `null` placeholders.
//!
//! On the receiving side [`GeometryTransport::reconstruct`] rebuilds the
//! geometry. Mesh geometries that arrive without normals get them computed, so
//! lighting is never left undefined.

use cgmath::{InnerSpace, Vector3, Zero};
use log::warn;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use super::{
    buffer::{deep_copy, stride_of, validate_attribute, SharedBuffer, TypedArray},
    data::DataTransport,
    Envelope, Transport,
};
use crate::error::TransportError;

/// Type discriminator of a geometry envelope.
pub const GEOMETRY_TRANSPORT_TYPE: &str = "GeometryTransport";

/// Attribute slots read from a geometry, in wire order.
pub const GEOMETRY_SLOTS: [&str; 7] = [
    "position",
    "normal",
    "uv",
    "color",
    "skinIndex",
    "skinWeight",
    "index",
];

/// Which renderable primitive a geometry describes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum GeometryType {
    /// Triangle mesh
    #[default]
    Mesh = 0,
    /// Line segments
    LineSegments = 1,
    /// Point cloud
    Points = 2,
}

impl GeometryType {
    /// Decodes the wire discriminator, `None` for unknown values.
    pub fn from_wire(value: u8) -> Option<Self> {
        FromPrimitive::from_u8(value)
    }

    /// Encodes the wire discriminator.
    pub fn to_wire(self) -> u8 {
        self.to_u8().unwrap_or_default()
    }
}

/// A buffer interpreted as an attribute with a fixed item size.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferAttribute {
    /// Element data
    pub array: SharedBuffer,
    /// Elements per vertex
    pub item_size: usize,
}

impl BufferAttribute {
    /// Number of items (vertices, or indices for an index attribute).
    pub fn count(&self) -> usize {
        self.array.len() / self.item_size.max(1)
    }
}

/// A draw range bound to one material of a multi-material mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryGroup {
    /// First vertex (or index) of the range
    pub start: usize,
    /// Number of vertices (or indices)
    pub count: usize,
    /// Index into the material list
    pub material_index: usize,
}

/// A geometry-like object: vertex attributes plus optional index and groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    /// Name of the object the geometry belongs to
    pub name: String,
    /// Vertex positions (stride 3)
    pub position: Option<BufferAttribute>,
    /// Vertex normals (stride 3)
    pub normal: Option<BufferAttribute>,
    /// Texture coordinates (stride 2)
    pub uv: Option<BufferAttribute>,
    /// Vertex colors (stride 3)
    pub color: Option<BufferAttribute>,
    /// Skinning bone indices (stride 4)
    pub skin_index: Option<BufferAttribute>,
    /// Skinning bone weights (stride 4)
    pub skin_weight: Option<BufferAttribute>,
    /// Triangle / segment indices (stride 1)
    pub index: Option<BufferAttribute>,
    /// Multi-material draw ranges
    pub groups: Vec<GeometryGroup>,
}

impl Geometry {
    /// Creates an empty geometry.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn slot(&self, name: &str) -> Option<&Option<BufferAttribute>> {
        match name {
            "position" => Some(&self.position),
            "normal" => Some(&self.normal),
            "uv" => Some(&self.uv),
            "color" => Some(&self.color),
            "skinIndex" => Some(&self.skin_index),
            "skinWeight" => Some(&self.skin_weight),
            "index" => Some(&self.index),
            _ => None,
        }
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Option<BufferAttribute>> {
        match name {
            "position" => Some(&mut self.position),
            "normal" => Some(&mut self.normal),
            "uv" => Some(&mut self.uv),
            "color" => Some(&mut self.color),
            "skinIndex" => Some(&mut self.skin_index),
            "skinWeight" => Some(&mut self.skin_weight),
            "index" => Some(&mut self.index),
            _ => None,
        }
    }

    /// A standard attribute by wire name.
    pub fn attribute(&self, name: &str) -> Option<&BufferAttribute> {
        self.slot(name).and_then(Option::as_ref)
    }

    /// Sets a standard attribute by wire name, checking its stride. Index
    /// buffers must hold unsigned integers.
    ///
    /// Unknown attribute names are ignored with a warning.
    pub fn set_attribute(
        &mut self,
        name: &str,
        array: impl Into<SharedBuffer>,
    ) -> Result<&mut Self, TransportError> {
        let array = array.into();
        validate_attribute(name, &array)?;
        let item_size = stride_of(name).unwrap_or(1);
        match self.slot_mut(name) {
            Some(slot) => *slot = Some(BufferAttribute { array, item_size }),
            None => warn!("Ignoring non-standard geometry attribute `{}`", name),
        }
        Ok(self)
    }

    /// Number of vertices described by the position attribute.
    pub fn vertex_count(&self) -> usize {
        self.position.as_ref().map_or(0, BufferAttribute::count)
    }

    /// Computes smooth vertex normals from positions (and index, if any).
    ///
    /// Face normals are accumulated per vertex and normalized; degenerate
    /// triangles and out-of-range indices contribute nothing.
    ///
    /// # Returns
    /// `true` if a normal attribute was written
    pub fn compute_vertex_normals(&mut self) -> bool {
        let Some(positions) = self.position.as_ref().and_then(|p| p.array.as_f32()) else {
            return false;
        };
        let vertex_count = positions.len() / 3;
        if vertex_count < 3 {
            return false;
        }

        let vertex = |i: usize| Vector3::new(positions[i * 3], positions[i * 3 + 1], positions[i * 3 + 2]);

        let triangles: Vec<[usize; 3]> = match self.index.as_ref().and_then(|i| i.array.to_indices()) {
            Some(indices) => indices
                .chunks_exact(3)
                .map(|tri| [tri[0], tri[1], tri[2]])
                .collect(),
            None => (0..vertex_count / 3)
                .map(|t| [t * 3, t * 3 + 1, t * 3 + 2])
                .collect(),
        };

        let mut normals = vec![Vector3::<f32>::zero(); vertex_count];
        for [a, b, c] in triangles {
            if a >= vertex_count || b >= vertex_count || c >= vertex_count {
                continue;
            }
            let (pa, pb, pc) = (vertex(a), vertex(b), vertex(c));
            let face = (pc - pb).cross(pa - pb);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }

        let flat: Vec<f32> = normals
            .into_iter()
            .flat_map(|n| {
                let n = if n.magnitude2() > 0.0 { n.normalize() } else { n };
                [n.x, n.y, n.z]
            })
            .collect();

        self.normal = Some(BufferAttribute {
            array: TypedArray::from(flat).into(),
            item_size: 3,
        });
        true
    }
}

/// Envelope carrying one geometry.
#[derive(Debug, Clone)]
pub struct GeometryTransport {
    data: DataTransport,
    geometry_type: GeometryType,
}

impl GeometryTransport {
    /// Creates an empty geometry envelope.
    pub fn new(cmd: &str, id: u64) -> Self {
        Self {
            data: DataTransport::with_type(cmd, id, Self::TYPE_NAME),
            geometry_type: GeometryType::Mesh,
        }
    }

    /// Kind of primitive the geometry describes.
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    /// Reads the attribute slots of `geometry`.
    ///
    /// Present slots are added as buffers (shared, not copied); absent slots
    /// are recorded as `null`.
    pub fn set_geometry(
        &mut self,
        geometry: &Geometry,
        geometry_type: GeometryType,
    ) -> Result<&mut Self, TransportError> {
        for name in GEOMETRY_SLOTS {
            match geometry.attribute(name) {
                Some(attribute) => {
                    self.data.add_buffer(name, attribute.array.clone())?;
                }
                None => {
                    self.data.set_null_buffer(name);
                }
            }
        }

        self.geometry_type = geometry_type;
        self.data
            .set_param("geometryType", geometry_type.to_wire())?
            .set_param("name", &geometry.name)?
            .set_param("groups", &geometry.groups)?;
        Ok(self)
    }

    /// Rebuilds the geometry from the received buffers.
    ///
    /// Attributes that violate their stride, and float index buffers, are
    /// omitted with a warning. Missing normals are computed for mesh geometries.
    ///
    /// # Arguments
    /// * `clone_buffers` - Copy the buffers so the envelope keeps its own
    pub fn reconstruct(&self, clone_buffers: bool) -> Geometry {
        let mut geometry = Geometry::new(
            self.data
                .param("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
        );

        for name in GEOMETRY_SLOTS {
            let Some(buffer) = self.data.buffer(name) else {
                continue;
            };
            let array = if clone_buffers {
                deep_copy(buffer)
            } else {
                buffer.clone()
            };
            if let Err(err) = geometry.set_attribute(name, array) {
                warn!("Omitting attribute while reconstructing geometry: {}", err);
            }
        }

        geometry.groups = match self.data.param_as::<Vec<GeometryGroup>>("groups") {
            Ok(groups) => groups,
            Err(TransportError::MissingParam(_)) => Vec::new(),
            Err(err) => {
                warn!("Ignoring malformed geometry groups: {}", err);
                Vec::new()
            }
        };

        if geometry.normal.is_none()
            && self.geometry_type == GeometryType::Mesh
            && !geometry.compute_vertex_normals()
            && geometry.position.is_some()
        {
            warn!(
                "Geometry `{}` has too few vertices to derive normals",
                geometry.name
            );
        }

        geometry
    }
}

impl Transport for GeometryTransport {
    const TYPE_NAME: &'static str = GEOMETRY_TRANSPORT_TYPE;

    fn data(&self) -> &DataTransport {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DataTransport {
        &mut self.data
    }

    fn package(&mut self, clone_buffers: bool) -> Result<&mut Self, TransportError> {
        self.data.package(clone_buffers)?;
        Ok(self)
    }

    fn into_envelope(self) -> Result<Envelope, TransportError> {
        self.data.into_envelope()
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, TransportError> {
        let data = DataTransport::from_envelope(envelope)?;
        Self::from_data(data)
    }
}

impl GeometryTransport {
    pub(crate) fn from_data(data: DataTransport) -> Result<Self, TransportError> {
        data.expect_type(Self::TYPE_NAME)?;
        let geometry_type = match data.param("geometryType").and_then(|v| v.as_u64()) {
            Some(value) => u8::try_from(value)
                .ok()
                .and_then(GeometryType::from_wire)
                .unwrap_or_else(|| {
                    warn!("Unknown geometry type {}, reconstructing as mesh", value);
                    GeometryType::Mesh
                }),
            None => GeometryType::Mesh,
        };
        Ok(Self {
            data,
            geometry_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn triangle() -> Geometry {
        let mut geometry = Geometry::new("triangle");
        geometry
            .set_attribute(
                "position",
                TypedArray::from(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            )
            .unwrap();
        geometry
    }

    fn send(geometry: &Geometry, geometry_type: GeometryType) -> GeometryTransport {
        let mut transport = GeometryTransport::new("execComplete", 1);
        transport.set_geometry(geometry, geometry_type).unwrap();
        let envelope = transport.into_envelope().unwrap();
        GeometryTransport::from_envelope(envelope).unwrap()
    }

    #[test]
    fn round_trip_derives_missing_normals() {
        let received = send(&triangle(), GeometryType::Mesh);
        let geometry = received.reconstruct(false);

        let position = geometry.position.as_ref().unwrap();
        assert_eq!(
            position.array.as_f32().unwrap(),
            &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );

        let normal = geometry.normal.as_ref().expect("normals are derived");
        assert_eq!(normal.item_size, 3);
        assert_eq!(
            normal.array.as_f32().unwrap(),
            &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn absent_slots_travel_as_null() {
        let mut transport = GeometryTransport::new("execComplete", 1);
        transport
            .set_geometry(&triangle(), GeometryType::Mesh)
            .unwrap();
        let envelope = transport.into_envelope().unwrap();

        assert_eq!(envelope.transferables.len(), 1);
        assert_eq!(envelope.main.buffers.get("position"), Some(&Some(0)));
        assert_eq!(envelope.main.buffers.get("uv"), Some(&None));
        assert_eq!(envelope.main.buffers.get("skinWeight"), Some(&None));
    }

    #[test]
    fn indexed_normals_are_shared_per_vertex() {
        let mut geometry = Geometry::new("quad");
        geometry
            .set_attribute(
                "position",
                TypedArray::from(vec![
                    0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
                ]),
            )
            .unwrap()
            .set_attribute("index", TypedArray::from(vec![0u32, 1, 2, 0, 2, 3]))
            .unwrap();

        assert!(geometry.compute_vertex_normals());
        let normals = geometry.normal.unwrap();
        for n in normals.array.as_f32().unwrap().chunks(3) {
            assert_eq!(n, &[0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn lines_keep_their_type_and_skip_normals() {
        let received = send(&triangle(), GeometryType::LineSegments);
        assert_eq!(received.geometry_type(), GeometryType::LineSegments);
        assert!(received.reconstruct(false).normal.is_none());
    }

    #[test]
    fn transmitted_normals_are_kept() {
        let mut geometry = triangle();
        geometry
            .set_attribute("normal", TypedArray::from(vec![1.0f32; 9]))
            .unwrap();

        let reconstructed = send(&geometry, GeometryType::Mesh).reconstruct(false);
        assert_eq!(
            reconstructed.normal.unwrap().array.as_f32().unwrap(),
            &[1.0f32; 9]
        );
    }

    #[test]
    fn malformed_optional_attribute_is_omitted() {
        let mut main = crate::transport::TransportMain::new("execComplete", 1, GEOMETRY_TRANSPORT_TYPE);
        main.buffers.insert("position".into(), Some(0));
        main.buffers.insert("uv".into(), Some(1));
        let envelope = Envelope {
            main,
            transferables: vec![
                Arc::new(TypedArray::from(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0])),
                Arc::new(TypedArray::from(vec![0.0f32; 5])),
            ],
        };

        let geometry = GeometryTransport::from_envelope(envelope)
            .unwrap()
            .reconstruct(false);
        assert!(geometry.uv.is_none());
        assert_eq!(geometry.vertex_count(), 3);
        assert!(geometry.normal.is_some());
    }

    #[test]
    fn float_index_is_refused() {
        let mut geometry = triangle();
        let err = geometry
            .set_attribute("index", TypedArray::from(vec![0.0f32, 1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidIndexKind(_)));
        assert!(geometry.index.is_none());

        geometry
            .set_attribute("index", TypedArray::from(vec![0u32, 1, 2]))
            .unwrap();
        assert_eq!(geometry.index.as_ref().map(BufferAttribute::count), Some(3));
    }

    #[test]
    fn reconstruct_with_clone_copies() {
        let received = send(&triangle(), GeometryType::Points);
        let shared = received.reconstruct(false);
        let copied = received.reconstruct(true);
        let original = received.data().buffer("position").unwrap();

        assert!(Arc::ptr_eq(original, &shared.position.unwrap().array));
        assert!(!Arc::ptr_eq(original, &copied.position.unwrap().array));
    }

    #[test]
    fn wire_discriminator() {
        assert_eq!(GeometryType::from_wire(2), Some(GeometryType::Points));
        assert_eq!(GeometryType::from_wire(7), None);
        assert_eq!(GeometryType::LineSegments.to_wire(), 1);
    }
}
