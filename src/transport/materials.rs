//! Materials envelope.
//!
//! Materials cross the boundary as minimal serde descriptors. Texture
//! references never travel: [`MaterialsTransport::clean_materials`] strips them
//! and the receiver resolves every material by name against its own
//! [`MaterialCache`].
//!
//! A [`MaterialCloneInstruction`] derives a variant of a material the receiver
//! already knows, so only the overridden properties are sent.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{data::DataTransport, Envelope, Transport};
use crate::error::TransportError;

/// Type discriminator of a materials envelope.
pub const MATERIALS_TRANSPORT_TYPE: &str = "MaterialsTransport";

/// A serializable material description.
///
/// Properties without a dedicated field are kept in `extra` and survive a
/// round trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Material {
    /// Lookup key in the material cache
    pub name: String,
    /// Renderer material kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Linear RGB base color
    pub color: [f32; 3],
    /// Opacity in `[0, 1]`
    pub opacity: f32,
    /// Whether blending is enabled
    pub transparent: bool,
    /// Whether the vertex color attribute is used
    pub vertex_colors: bool,
    /// Whether normals are ignored in favor of face normals
    pub flat_shading: bool,
    /// Texture slot → texture name
    pub maps: BTreeMap<String, String>,
    /// Any further renderer specific properties
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "MeshStandardMaterial".to_string(),
            color: [1.0, 1.0, 1.0],
            opacity: 1.0,
            transparent: false,
            vertex_colors: false,
            flat_shading: false,
            maps: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

impl Material {
    /// Creates a material with default properties.
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    /// Overrides the given properties, leaving every other property as is.
    ///
    /// Keys use the wire (camelCase) names, e.g. `{"color": [1, 0, 0]}`.
    pub fn apply_properties(&mut self, properties: &Map<String, Value>) -> Result<(), TransportError> {
        if properties.is_empty() {
            return Ok(());
        }
        let mut value = serde_json::to_value(&*self)?;
        if let Value::Object(fields) = &mut value {
            for (key, property) in properties {
                fields.insert(key.clone(), property.clone());
            }
        }
        *self = serde_json::from_value(value)?;
        Ok(())
    }
}

/// Receive side directive to derive a material from an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialCloneInstruction {
    /// Name of the source material
    pub material_name_org: String,
    /// Name the derived material is stored under
    pub material_name: String,
    /// Properties overridden on the copy
    #[serde(default)]
    pub material_properties: Map<String, Value>,
}

/// Receive side material storage.
pub trait MaterialCache {
    /// A copy of the material stored under `name`.
    fn get_material(&self, name: &str) -> Option<Material>;

    /// Adds materials keyed by name.
    ///
    /// # Arguments
    /// * `materials` - Materials to add
    /// * `force_override` - Replace materials that are already present
    fn add_materials(&mut self, materials: BTreeMap<String, Material>, force_override: bool);
}

/// In-memory [`MaterialCache`] seeded with the three default materials.
#[derive(Debug, Clone)]
pub struct MaterialStore {
    materials: HashMap<String, Material>,
}

impl MaterialStore {
    /// Name of the default triangle mesh material.
    pub const DEFAULT_MATERIAL: &'static str = "defaultMaterial";
    /// Name of the default line material.
    pub const DEFAULT_LINE_MATERIAL: &'static str = "defaultLineMaterial";
    /// Name of the default point material.
    pub const DEFAULT_POINT_MATERIAL: &'static str = "defaultPointMaterial";

    /// Creates a store holding only the default materials.
    pub fn new() -> Self {
        let defaults = [
            Material::new(Self::DEFAULT_MATERIAL, "MeshStandardMaterial"),
            Material::new(Self::DEFAULT_LINE_MATERIAL, "LineBasicMaterial"),
            Material::new(Self::DEFAULT_POINT_MATERIAL, "PointsMaterial"),
        ];
        Self {
            materials: defaults
                .into_iter()
                .map(|material| (material.name.clone(), material))
                .collect(),
        }
    }

    /// Number of stored materials.
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Whether a material is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.materials.contains_key(name)
    }
}

impl Default for MaterialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialCache for MaterialStore {
    fn get_material(&self, name: &str) -> Option<Material> {
        self.materials.get(name).cloned()
    }

    fn add_materials(&mut self, materials: BTreeMap<String, Material>, force_override: bool) {
        for (name, mut material) in materials {
            if force_override || !self.materials.contains_key(&name) {
                material.name = name.clone();
                self.materials.insert(name, material);
            }
        }
    }
}

/// Materials resolved against a cache, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMaterials {
    /// One entry per referenced material
    pub materials: Vec<Material>,
    /// Whether the receiver should build a multi-material object
    pub multi_material: bool,
}

/// Envelope carrying material descriptors and clone instructions.
#[derive(Debug, Clone)]
pub struct MaterialsTransport {
    data: DataTransport,
    materials: Vec<Material>,
    multi_material: bool,
    clone_instructions: Vec<MaterialCloneInstruction>,
}

impl MaterialsTransport {
    /// Creates an empty materials envelope.
    pub fn new(cmd: &str, id: u64) -> Self {
        Self {
            data: DataTransport::with_type(cmd, id, Self::TYPE_NAME),
            materials: Vec::new(),
            multi_material: false,
            clone_instructions: Vec::new(),
        }
    }

    /// Adds a material, replacing one with the same name.
    pub fn add_material(&mut self, material: Material) -> &mut Self {
        match self.materials.iter_mut().find(|m| m.name == material.name) {
            Some(existing) => *existing = material,
            None => self.materials.push(material),
        }
        self
    }

    /// Materials in transport order.
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Whether the set is a multi-material group.
    pub fn multi_material(&self) -> bool {
        self.multi_material
    }

    /// Adds a derive directive.
    pub fn add_clone_instruction(&mut self, instruction: MaterialCloneInstruction) -> &mut Self {
        self.clone_instructions.push(instruction);
        self
    }

    /// Pending derive directives.
    pub fn clone_instructions(&self) -> &[MaterialCloneInstruction] {
        &self.clone_instructions
    }

    /// Strips texture references and records single vs multi material.
    pub fn clean_materials(&mut self) -> &mut Self {
        for material in &mut self.materials {
            material.maps.clear();
            material
                .extra
                .retain(|key, _| key != "map" && !key.ends_with("Map"));
        }
        self.multi_material = self.materials.len() > 1;
        self
    }

    pub(crate) fn write_params(&mut self) -> Result<(), TransportError> {
        self.data
            .set_param("materials", &self.materials)?
            .set_param("multiMaterial", self.multi_material)?
            .set_param("cloneInstructions", &self.clone_instructions)?;
        Ok(())
    }

    pub(crate) fn from_data(data: DataTransport) -> Result<Self, TransportError> {
        data.expect_type(Self::TYPE_NAME)?;
        let materials = optional_param(&data, "materials")?.unwrap_or_default();
        let multi_material = optional_param(&data, "multiMaterial")?.unwrap_or(false);
        let clone_instructions = optional_param(&data, "cloneInstructions")?.unwrap_or_default();
        Ok(Self {
            data,
            materials,
            multi_material,
            clone_instructions,
        })
    }

    /// Applies clone instructions and resolves every material by name.
    ///
    /// Derived materials are stored in `cache` under their new name, replacing
    /// an earlier derivation of the same name. Transported definitions are
    /// only added when the cache does not know them yet. Source materials are
    /// never modified.
    ///
    /// # Arguments
    /// * `cache` - Receive side material storage
    /// * `log` - Log every derived and resolved material
    pub fn process_material_transport(
        &self,
        cache: &mut dyn MaterialCache,
        log: bool,
    ) -> Result<ResolvedMaterials, TransportError> {
        for instruction in &self.clone_instructions {
            let source = cache
                .get_material(&instruction.material_name_org)
                .or_else(|| {
                    self.materials
                        .iter()
                        .find(|m| m.name == instruction.material_name_org)
                        .cloned()
                })
                .ok_or_else(|| TransportError::UnknownMaterial(instruction.material_name_org.clone()))?;

            let mut derived = source;
            derived.apply_properties(&instruction.material_properties)?;
            derived.name = instruction.material_name.clone();
            if log {
                info!(
                    "Derived material `{}` from `{}`",
                    derived.name, instruction.material_name_org
                );
            }
            cache.add_materials(BTreeMap::from([(derived.name.clone(), derived)]), true);
        }

        if !self.materials.is_empty() {
            cache.add_materials(
                self.materials
                    .iter()
                    .map(|m| (m.name.clone(), m.clone()))
                    .collect(),
                false,
            );
        }

        let mut names: Vec<&str> = self.materials.iter().map(|m| m.name.as_str()).collect();
        for instruction in &self.clone_instructions {
            if !names.contains(&instruction.material_name.as_str()) {
                names.push(&instruction.material_name);
            }
        }

        let materials = names
            .into_iter()
            .map(|name| {
                cache.get_material(name).ok_or_else(|| {
                    warn!("Material `{}` could not be resolved", name);
                    TransportError::UnknownMaterial(name.to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if log {
            info!(
                "Resolved {} material(s): {:?}",
                materials.len(),
                materials.iter().map(|m| m.name.as_str()).collect::<Vec<_>>()
            );
        }

        Ok(ResolvedMaterials {
            multi_material: self.multi_material || materials.len() > 1,
            materials,
        })
    }
}

fn optional_param<T: serde::de::DeserializeOwned>(
    data: &DataTransport,
    name: &str,
) -> Result<Option<T>, TransportError> {
    match data.param_as(name) {
        Ok(value) => Ok(Some(value)),
        Err(TransportError::MissingParam(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

impl Transport for MaterialsTransport {
    const TYPE_NAME: &'static str = MATERIALS_TRANSPORT_TYPE;

    fn data(&self) -> &DataTransport {
        &self.data
    }

    fn data_mut(&mut self) -> &mut DataTransport {
        &mut self.data
    }

    fn package(&mut self, clone_buffers: bool) -> Result<&mut Self, TransportError> {
        self.write_params()?;
        self.data.package(clone_buffers)?;
        Ok(self)
    }

    fn into_envelope(mut self) -> Result<Envelope, TransportError> {
        self.package(false)?;
        self.data.into_envelope()
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, TransportError> {
        Self::from_data(DataTransport::from_envelope(envelope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn red() -> Material {
        let mut material = Material::new("red", "MeshPhongMaterial");
        material.color = [1.0, 0.0, 0.0];
        material
    }

    fn derive(org: &str, name: &str, properties: Value) -> MaterialCloneInstruction {
        MaterialCloneInstruction {
            material_name_org: org.to_string(),
            material_name: name.to_string(),
            material_properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn clean_strips_texture_references() {
        let mut textured = red();
        textured.maps.insert("map".into(), "bricks.png".into());
        textured.extra.insert("bumpMap".into(), json!("bump.png"));
        textured.extra.insert("shininess".into(), json!(30));

        let mut transport = MaterialsTransport::new("execComplete", 1);
        transport.add_material(textured).add_material(Material::new("blue", "MeshPhongMaterial"));
        transport.clean_materials();

        let cleaned = &transport.materials()[0];
        assert!(cleaned.maps.is_empty());
        assert!(!cleaned.extra.contains_key("bumpMap"));
        assert_eq!(cleaned.extra.get("shininess"), Some(&json!(30)));
        assert!(transport.multi_material());
    }

    #[test]
    fn materials_survive_the_wire() {
        let mut transport = MaterialsTransport::new("execComplete", 4);
        transport
            .add_material(red())
            .add_clone_instruction(derive("red", "redVertex", json!({ "vertexColors": true })));
        let envelope = transport.into_envelope().unwrap();
        assert_eq!(envelope.type_name(), MATERIALS_TRANSPORT_TYPE);

        let received = MaterialsTransport::from_envelope(envelope).unwrap();
        assert_eq!(received.materials(), &[red()]);
        assert_eq!(received.clone_instructions().len(), 1);
    }

    #[test]
    fn derivations_never_mutate_their_source() {
        let mut cache = MaterialStore::new();
        cache.add_materials(BTreeMap::from([("red".to_string(), red())]), false);

        let mut first = MaterialsTransport::new("execComplete", 1);
        first.add_clone_instruction(derive("red", "b", json!({ "opacity": 0.5, "transparent": true })));
        first.process_material_transport(&mut cache, false).unwrap();

        let mut second = MaterialsTransport::new("execComplete", 2);
        second.add_clone_instruction(derive("b", "c", json!({ "color": [0.0, 0.0, 1.0] })));
        let resolved = second.process_material_transport(&mut cache, false).unwrap();

        assert_eq!(cache.get_material("red"), Some(red()));

        let b = cache.get_material("b").unwrap();
        assert_eq!(b.opacity, 0.5);
        assert_eq!(b.color, [1.0, 0.0, 0.0]);

        let c = &resolved.materials[0];
        assert_eq!(c.name, "c");
        assert_eq!(c.color, [0.0, 0.0, 1.0]);
        assert_eq!(c.opacity, 0.5);
        assert!(c.transparent);
    }

    #[test]
    fn transported_definitions_do_not_override_cache() {
        let mut cache = MaterialStore::new();
        let mut local = red();
        local.opacity = 0.25;
        cache.add_materials(BTreeMap::from([("red".to_string(), local.clone())]), false);

        let mut transport = MaterialsTransport::new("execComplete", 1);
        transport
            .add_material(red())
            .add_material(Material::new("green", "MeshPhongMaterial"));

        let resolved = transport.process_material_transport(&mut cache, true).unwrap();
        assert_eq!(resolved.materials[0], local);
        assert_eq!(resolved.materials[1].name, "green");
        assert!(resolved.multi_material);
        assert!(cache.contains("green"));
    }

    #[test]
    fn unknown_clone_source_is_reported() {
        let mut cache = MaterialStore::new();
        let mut transport = MaterialsTransport::new("execComplete", 1);
        transport.add_clone_instruction(derive("missing", "x", json!({})));

        let err = transport
            .process_material_transport(&mut cache, false)
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownMaterial(name) if name == "missing"));
    }

    #[test]
    fn store_starts_with_defaults() {
        let store = MaterialStore::new();
        assert_eq!(store.len(), 3);
        assert!(store.contains(MaterialStore::DEFAULT_LINE_MATERIAL));
        assert_eq!(
            store.get_material(MaterialStore::DEFAULT_POINT_MATERIAL).unwrap().kind,
            "PointsMaterial"
        );
    }
}
