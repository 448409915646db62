//! Mesh envelope: one geometry and one materials envelope describing a single
//! renderable unit.
//!
//! Both halves are packaged against a shared [`TransferList`], so a buffer
//! referenced from geometry and materials is still moved only once. Their
//! `main` halves travel nested in the mesh parameters `geometry` and
//! `materials`.

use super::{
    buffer::TransferList,
    data::DataTransport,
    geometry::{Geometry, GeometryTransport, GeometryType},
    materials::MaterialsTransport,
    Envelope, Transport, TransportMain,
};
use crate::error::{TaskError, TransportError};

/// Type discriminator of a mesh envelope.
pub const MESH_TRANSPORT_TYPE: &str = "MeshTransport";

/// Envelope pairing a geometry with its materials.
#[derive(Debug, Clone)]
pub struct MeshTransport {
    data: DataTransport,
    geometry: GeometryTransport,
    materials: MaterialsTransport,
}

impl MeshTransport {
    /// Creates an empty mesh envelope.
    pub fn new(cmd: &str, id: u64) -> Self {
        Self {
            data: DataTransport::with_type(cmd, id, Self::TYPE_NAME),
            geometry: GeometryTransport::new(cmd, id),
            materials: MaterialsTransport::new(cmd, id),
        }
    }

    /// Reads the geometry into the geometry half.
    pub fn set_geometry(
        &mut self,
        geometry: &Geometry,
        geometry_type: GeometryType,
    ) -> Result<&mut Self, TransportError> {
        self.geometry.set_geometry(geometry, geometry_type)?;
        self.data.set_param("meshName", &geometry.name)?;
        Ok(self)
    }

    /// Replaces the materials half.
    pub fn set_materials(&mut self, materials: MaterialsTransport) -> &mut Self {
        self.materials = materials;
        self
    }

    /// The geometry half.
    pub fn geometry(&self) -> &GeometryTransport {
        &self.geometry
    }

    /// The materials half.
    pub fn materials(&self) -> &MaterialsTransport {
        &self.materials
    }

    /// The materials half, mutably.
    pub fn materials_mut(&mut self) -> &mut MaterialsTransport {
        &mut self.materials
    }
}

impl Transport for MeshTransport {
    const TYPE_NAME: &'static str = MESH_TRANSPORT_TYPE;

    fn data(&self) -> &DataTransport {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DataTransport {
        &mut self.data
    }

    fn package(&mut self, clone_buffers: bool) -> Result<&mut Self, TransportError> {
        let mut list = TransferList::new();

        self.geometry.data_mut().package_into(&mut list, clone_buffers);
        self.materials.write_params()?;
        self.materials.data_mut().package_into(&mut list, clone_buffers);
        self.data.package_into(&mut list, clone_buffers);

        self.data
            .set_param("geometry", self.geometry.data().main())?
            .set_param("materials", self.materials.data().main())?;
        self.data.set_transferables(list.into_transferables());
        Ok(self)
    }

    fn into_envelope(mut self) -> Result<Envelope, TransportError> {
        self.package(false)?;
        self.data.into_envelope()
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, TransportError> {
        let data = DataTransport::from_parts(envelope.main, &envelope.transferables)?;
        data.expect_type(Self::TYPE_NAME)?;

        let geometry_main: TransportMain = data.param_as("geometry")?;
        let materials_main: TransportMain = data.param_as("materials")?;

        Ok(Self {
            geometry: GeometryTransport::from_data(DataTransport::from_parts(
                geometry_main,
                &envelope.transferables,
            )?)?,
            materials: MaterialsTransport::from_data(DataTransport::from_parts(
                materials_main,
                &envelope.transferables,
            )?)?,
            data,
        })
    }
}

/// A parser that turns raw file contents into renderable units.
///
/// Implementations run inside an execution context and post each returned
/// mesh as an `intermediate` message.
pub trait MeshParser {
    /// Parses `data` into zero or more meshes.
    fn parse(&mut self, data: &[u8]) -> Result<Vec<MeshTransport>, TaskError>;
}
