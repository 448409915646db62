//! # Demo Workload
//!
//! A small end-to-end workload exercising both coordinators:
//!
//! * `echo` - a function-backed task type on the [`TaskManager`] that doubles
//!   the `value` parameter
//! * `mesh` - a [`WorkerPoolDirector`] pool whose workers parse a plain text
//!   triangle soup and stream every parsed mesh back as an `intermediate`
//!   message before completing
//!
//! The triangle soup format has one statement per line:
//!
//! ```text
//! o quad
//! v 0 0 0
//! v 1 0 0
//! v 1 1 0
//! ```
//!
//! `o <name>` starts a new mesh, `v <x> <y> <z>` adds a vertex; every three
//! vertices form one triangle. Empty lines and lines starting with `#` are
//! skipped.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::{
    config::{DirectorConfig, TaskManagerConfig},
    director::{PoolDefinition, RunInstruction, WorkerPoolDirector},
    error::TaskError,
    task_management::{execute_fn, TaskManager, TaskWorker, WorkerFunctions, WorkerScope},
    transport::{
        cmd, DataTransport, Geometry, GeometryType, Material, MaterialCache, MaterialStore,
        MaterialsTransport, MeshParser, MeshTransport, Transport, TypedArray,
    },
};

/// Task type registered by [`run_demo`] on the task manager.
pub const ECHO_TASK: &str = "echo";

/// Pool registered by [`run_demo`] on the director.
pub const MESH_POOL: &str = "mesh";

/// Material assigned to parsed meshes unless the pool configures another one.
pub const SOUP_MATERIAL: &str = "soupMaterial";

/// Summary of one demo run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    /// Value returned by the echo task for the input `21`
    pub echo_value: i64,
    /// Meshes received as intermediate messages
    pub mesh_count: usize,
    /// Vertices over all received meshes
    pub vertex_count: usize,
}

/// Functions of the `echo` task type.
pub fn echo_functions() -> WorkerFunctions {
    WorkerFunctions::new(execute_fn(|scope, id, config| {
        let value: i64 = config.param_as("value")?;
        let mut reply = DataTransport::new(cmd::EXEC_COMPLETE, id);
        reply.set_param("value", value * 2)?;
        scope.post(reply)
    }))
}

/// Parser of the plain text triangle soup format.
#[derive(Debug, Clone)]
pub struct TriangleSoupParser {
    material_name: String,
}

impl TriangleSoupParser {
    /// A parser assigning `material_name` to every mesh.
    pub fn new(material_name: &str) -> Self {
        Self {
            material_name: material_name.to_string(),
        }
    }

    fn finish_mesh(
        &self,
        name: &str,
        positions: Vec<f32>,
        meshes: &mut Vec<MeshTransport>,
    ) -> Result<(), TaskError> {
        if positions.is_empty() {
            return Ok(());
        }
        if positions.len() % 9 != 0 {
            return Err(TaskError::worker(format!(
                "mesh `{}` has {} vertices, which do not form whole triangles",
                name,
                positions.len() / 3
            )));
        }

        let mut geometry = Geometry::new(name);
        geometry.set_attribute("position", TypedArray::from(positions))?;

        let mut materials = MaterialsTransport::new(cmd::INTERMEDIATE, 0);
        materials.add_material(Material::new(&self.material_name, "MeshStandardMaterial"));
        materials.clean_materials();

        let mut mesh = MeshTransport::new(cmd::INTERMEDIATE, 0);
        mesh.set_geometry(&geometry, GeometryType::Mesh)?;
        mesh.set_materials(materials);
        meshes.push(mesh);
        Ok(())
    }
}

impl Default for TriangleSoupParser {
    fn default() -> Self {
        Self::new(SOUP_MATERIAL)
    }
}

impl MeshParser for TriangleSoupParser {
    fn parse(&mut self, data: &[u8]) -> Result<Vec<MeshTransport>, TaskError> {
        let text = std::str::from_utf8(data)
            .map_err(|err| TaskError::worker(format!("input is not UTF-8: {}", err)))?;

        let mut meshes = Vec::new();
        let mut name = String::from("mesh");
        let mut positions = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("o") => {
                    self.finish_mesh(&name, std::mem::take(&mut positions), &mut meshes)?;
                    name = tokens.collect::<Vec<_>>().join(" ");
                }
                Some("v") => {
                    let coordinates = tokens
                        .map(str::parse::<f32>)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|err| {
                            TaskError::worker(format!("line {}: {}", index + 1, err))
                        })?;
                    if coordinates.len() != 3 {
                        return Err(TaskError::worker(format!(
                            "line {}: expected 3 coordinates, found {}",
                            index + 1,
                            coordinates.len()
                        )));
                    }
                    positions.extend(coordinates);
                }
                Some(other) => {
                    return Err(TaskError::worker(format!(
                        "line {}: unknown statement `{}`",
                        index + 1,
                        other
                    )))
                }
                None => {}
            }
        }

        self.finish_mesh(&name, positions, &mut meshes)?;
        Ok(meshes)
    }
}

/// Worker of the `mesh` pool.
///
/// Reads the `payload` buffer of each instruction, posts every parsed mesh as
/// `intermediate` and completes with the `meshCount` parameter. The pool's
/// init configuration may name the material through `materialName`.
#[derive(Debug, Default)]
pub struct MeshWorker {
    parser: TriangleSoupParser,
}

impl TaskWorker for MeshWorker {
    fn execute(
        &mut self,
        scope: &mut WorkerScope,
        id: u64,
        config: DataTransport,
    ) -> Result<(), TaskError> {
        let payload = config
            .buffer("payload")
            .ok_or_else(|| TaskError::worker("instruction carries no `payload` buffer"))?;
        let material_name = scope
            .init_config()
            .and_then(|init| init.param("materialName"))
            .and_then(|v| v.as_str())
            .unwrap_or(SOUP_MATERIAL);
        if self.parser.material_name != material_name {
            self.parser = TriangleSoupParser::new(material_name);
        }
        let meshes = self.parser.parse(payload.as_bytes())?;
        let mesh_count = meshes.len();

        for mut mesh in meshes {
            mesh.data_mut().set_cmd(cmd::INTERMEDIATE).set_id(id);
            scope.post(mesh)?;
        }

        let mut reply = DataTransport::new(cmd::EXEC_COMPLETE, id);
        reply.set_param("meshCount", mesh_count)?;
        scope.post(reply)
    }
}

/// Triangle soup with two meshes, used by [`run_demo`].
pub const DEMO_SOUP: &str = "\
o triangle
v 0 0 0
v 1 0 0
v 0 1 0

o quad
v 0 0 1
v 1 0 1
v 1 1 1
v 0 0 1
v 1 1 1
v 0 1 1
";

/// Runs the echo task and parses [`DEMO_SOUP`] through the director.
///
/// # Arguments
/// * `force_fallback` - Run everything inline on the calling thread
pub fn run_demo(force_fallback: bool) -> Result<DemoReport, TaskError> {
    let manager = TaskManager::new(TaskManagerConfig {
        force_fallback,
        ..Default::default()
    });
    let functions = echo_functions();
    manager.register_task_type(
        ECHO_TASK,
        functions.init,
        functions.execute,
        functions.com_routing,
        false,
        Vec::new(),
    );
    pollster::block_on(manager.init_task_type(ECHO_TASK, DataTransport::new(cmd::INIT, 0))?)?;

    let mut request = DataTransport::new(cmd::EXECUTE, 0);
    request.set_param("value", 21)?;
    let reply = pollster::block_on(manager.enqueue_for_execution(ECHO_TASK, request)?)?;
    let echo_value: i64 = DataTransport::from_envelope(reply)?.param_as("value")?;
    manager.dispose();

    let director = WorkerPoolDirector::new(DirectorConfig {
        force_fallback,
        ..Default::default()
    });
    director
        .register_pool(
            MESH_POOL,
            PoolDefinition::from_factory(|| Box::<MeshWorker>::default() as Box<dyn TaskWorker>)
                .with_max_workers(2),
        )
        .map_err(|err| TaskError::worker(err.to_string()))?;

    let store = Arc::new(Mutex::new(MaterialStore::new()));
    let received = Arc::new(Mutex::new(Vec::new()));
    let (receive_store, receive_list) = (store.clone(), received.clone());

    let mut instruction = DataTransport::new(cmd::EXECUTE, 0);
    instruction.add_buffer("payload", TypedArray::from(DEMO_SOUP.as_bytes().to_vec()))?;
    let instruction = RunInstruction::new(instruction)?.with_intermediate(move |envelope| {
        let mesh = match MeshTransport::from_envelope(envelope) {
            Ok(mesh) => mesh,
            Err(err) => {
                warn!("Discarding malformed mesh: {}", err);
                return;
            }
        };
        let geometry = mesh.geometry().reconstruct(false);
        let mut cache = receive_store.lock().unwrap_or_else(|e| e.into_inner());
        match mesh
            .materials()
            .process_material_transport(&mut *cache as &mut dyn MaterialCache, false)
        {
            Ok(resolved) => info!(
                "Received mesh `{}` ({} vertices, material `{}`)",
                geometry.name,
                geometry.vertex_count(),
                resolved.materials.first().map_or("", |m| m.name.as_str())
            ),
            Err(err) => warn!("Mesh `{}` has unresolved materials: {}", geometry.name, err),
        }
        receive_list
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(geometry);
    });

    let pending = director
        .enqueue_for_run(MESH_POOL, instruction)
        .map_err(|err| TaskError::worker(err.to_string()))?;
    let completion = DataTransport::from_envelope(pollster::block_on(pending)?)?;
    let mesh_count: usize = completion.param_as("meshCount")?;
    director.tear_down();

    let received = received.lock().unwrap_or_else(|e| e.into_inner());
    Ok(DemoReport {
        echo_value,
        mesh_count,
        vertex_count: received.iter().map(Geometry::vertex_count).sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soup_is_split_into_named_meshes() {
        let meshes = TriangleSoupParser::default()
            .parse(DEMO_SOUP.as_bytes())
            .unwrap();
        let names: Vec<_> = meshes
            .iter()
            .map(|mesh| mesh.geometry().reconstruct(false).name)
            .collect();
        assert_eq!(names, vec!["triangle", "quad"]);
        assert_eq!(meshes[1].geometry().reconstruct(false).vertex_count(), 6);
    }

    #[test]
    fn incomplete_triangle_is_an_error() {
        let result = TriangleSoupParser::default().parse(b"v 0 0 0\nv 1 0 0\n");
        assert!(matches!(result, Err(TaskError::Worker(_))));
    }

    #[test]
    fn unknown_statement_names_the_line() {
        let Err(TaskError::Worker(message)) = TriangleSoupParser::default().parse(b"# c\nf 1 2 3")
        else {
            panic!("expected a worker error");
        };
        assert!(message.starts_with("line 2"));
    }

    #[test]
    fn inline_demo_completes() {
        let report = run_demo(true).unwrap();
        assert_eq!(
            report,
            DemoReport {
                echo_value: 42,
                mesh_count: 2,
                vertex_count: 9,
            }
        );
    }
}
