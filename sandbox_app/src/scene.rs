//! Procedural scene feeding the render producers
//!
//! Geometry is generated once at startup. Every frame a culling worker
//! refreshes model visibility and signals the culling wait points the
//! shadow and scene passes block on.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use nalgebra::{Matrix4, Point3, Translation3, UnitQuaternion, Vector3};
use render_core::pipelines::{InstanceData, Vertex};
use render_core::prelude::*;
use render_core::producers::{CompletionSignal, LevelOfDetail, MaterialType};
use render_core::resources::BufferHandle;

const MODEL_COUNT: usize = 12;
const MODEL_RADIUS: f32 = 0.9;
const TERRAIN_PATCHES: u32 = 8;
const TERRAIN_EXTENT: f32 = 40.0;
const GRASS_BLADES: u32 = 4096;
const SHADOW_RANGE: f32 = 20.0;

fn cube_vertices() -> Vec<Vertex> {
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let mut vertices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let n = Vector3::from(normal);
        let (u, v) = (Vector3::from(u), Vector3::from(v));
        let corner = |su: f32, sv: f32| {
            let p = (n + u * su + v * sv) * 0.5;
            Vertex::new(p.into(), normal, [su.max(0.0), sv.max(0.0)])
        };
        let quad = [corner(-1.0, -1.0), corner(1.0, -1.0), corner(1.0, 1.0), corner(-1.0, 1.0)];
        vertices.extend([quad[0], quad[1], quad[2], quad[0], quad[2], quad[3]]);
    }
    vertices
}

/// Quad patches of four control points each, covering the ground plane
fn terrain_patches() -> Vec<Vertex> {
    let step = TERRAIN_EXTENT / TERRAIN_PATCHES as f32;
    let origin = -TERRAIN_EXTENT * 0.5;
    let height = |x: f32, z: f32| (x * 0.15).sin() * (z * 0.12).cos() * 1.5 - 0.5;
    let mut vertices = Vec::with_capacity((TERRAIN_PATCHES * TERRAIN_PATCHES * 4) as usize);
    for row in 0..TERRAIN_PATCHES {
        for column in 0..TERRAIN_PATCHES {
            let x0 = origin + column as f32 * step;
            let z0 = origin + row as f32 * step;
            for (dx, dz) in [(0.0, 0.0), (step, 0.0), (step, step), (0.0, step)] {
                let (x, z) = (x0 + dx, z0 + dz);
                vertices.push(Vertex::new(
                    [x, height(x, z), z],
                    [0.0, 1.0, 0.0],
                    [(x - origin) / TERRAIN_EXTENT, (z - origin) / TERRAIN_EXTENT],
                ));
            }
        }
    }
    vertices
}

/// Single tapered blade, two triangles, tip at v = 1
fn grass_blade() -> Vec<Vertex> {
    let normal = [0.0, 0.0, 1.0];
    let v = |x: f32, y: f32, u: f32, t: f32| Vertex::new([x, y, 0.0], normal, [u, t]);
    vec![
        v(-0.04, 0.0, 0.0, 0.0),
        v(0.04, 0.0, 1.0, 0.0),
        v(0.02, 0.5, 1.0, 0.5),
        v(-0.04, 0.0, 0.0, 0.0),
        v(0.02, 0.5, 1.0, 0.5),
        v(-0.02, 0.5, 0.0, 0.5),
    ]
}

/// Grass instances on a jittered grid
fn grass_instances() -> Vec<InstanceData> {
    let side = (GRASS_BLADES as f32).sqrt() as u32;
    let spacing = 12.0 / side as f32;
    (0..side * side)
        .map(|i| {
            let (row, column) = (i / side, i % side);
            // Cheap deterministic jitter
            let hash = ((i.wrapping_mul(2_654_435_761)) >> 16) as f32 / 65_535.0;
            let x = -6.0 + (column as f32 + hash) * spacing;
            let z = -6.0 + (row as f32 + (1.0 - hash)) * spacing;
            InstanceData {
                position_scale: [x, 0.0, z, 0.7 + 0.6 * hash],
                parameters: [hash * std::f32::consts::TAU, 0.5, hash, 0.0],
            }
        })
        .collect()
}

/// Interface panel in pixel coordinates
fn panel_quad() -> Vec<Vertex> {
    let normal = [0.0, 0.0, 1.0];
    let (x0, y0, x1, y1) = (16.0, 16.0, 256.0, 96.0);
    vec![
        Vertex::new([x0, y0, 0.0], normal, [0.0, 0.0]),
        Vertex::new([x1, y0, 0.0], normal, [1.0, 0.0]),
        Vertex::new([x1, y1, 0.0], normal, [1.0, 1.0]),
        Vertex::new([x0, y0, 0.0], normal, [0.0, 0.0]),
        Vertex::new([x1, y1, 0.0], normal, [1.0, 1.0]),
        Vertex::new([x0, y1, 0.0], normal, [0.0, 1.0]),
    ]
}

fn upload<T: bytemuck::Pod>(context: &mut RenderContext, usage: vk::BufferUsageFlags, data: &[T]) -> Result<BufferHandle> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    Ok(context.factory_mut().create_buffer(&BufferDesc {
        size: bytes.len() as u64,
        usage,
        location: MemoryLocation::DeviceLocal,
        initial_data: Some(bytes),
    })?)
}

/// World-space position of a model's transform
fn translation_of(transform: &Matrix4<f32>) -> Point3<f32> {
    Point3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)])
}

/// Visibility of a bounding sphere from the camera and the shadow view
pub fn classify(center: &Point3<f32>, eye: &Point3<f32>, forward: &Vector3<f32>, focus: &Point3<f32>) -> VisibilityFlags {
    let mut visibility = VisibilityFlags::empty();
    if (center - eye).dot(forward) > -MODEL_RADIUS {
        visibility |= VisibilityFlags::CAMERA;
    }
    if (center - focus).norm() < SHADOW_RANGE + MODEL_RADIUS {
        visibility |= VisibilityFlags::SHADOW_MAP_0;
    }
    visibility
}

/// Instance stores for every producer kind and the buffers behind them
pub struct Scene {
    models: Arc<InstanceStore>,
    registry: ProducerRegistry,
    waits: WaitPoints,
    model_culling: Arc<CompletionSignal>,
    shadow_culling: Arc<CompletionSignal>,
    buffers: Vec<BufferHandle>,
}

impl Scene {
    pub fn build(context: &mut RenderContext) -> Result<Self> {
        let vertex_usage = vk::BufferUsageFlags::VERTEX_BUFFER;
        let cube = upload(context, vertex_usage, &cube_vertices())?;
        let terrain_vertices = terrain_patches();
        let terrain_buffer = upload(context, vertex_usage, &terrain_vertices)?;
        let blade_vertices = grass_blade();
        let blade = upload(context, vertex_usage, &blade_vertices)?;
        let instances = grass_instances();
        let instance_buffer = upload(context, vertex_usage, &instances)?;
        let panel_vertices = panel_quad();
        let panel = upload(context, vertex_usage, &panel_vertices)?;

        let models = Arc::new(InstanceStore::new());
        models.replace(
            (0..MODEL_COUNT)
                .map(|i| {
                    let angle = i as f32 / MODEL_COUNT as f32 * std::f32::consts::TAU;
                    let transform = Translation3::new(angle.cos() * 8.0, 1.0, angle.sin() * 8.0).to_homogeneous()
                        * UnitQuaternion::from_euler_angles(0.0, angle, 0.0).to_homogeneous();
                    InstanceRecord::new(cube, 36)
                        .with_transform(transform)
                        .with_material(MaterialType::Opaque, LevelOfDetail::Full)
                        .with_visibility(VisibilityFlags::empty())
                })
                .collect(),
        );

        let terrain = Arc::new(InstanceStore::new());
        terrain.push(InstanceRecord::new(terrain_buffer, terrain_vertices.len() as u32));

        let vegetation = Arc::new(InstanceStore::new());
        vegetation.push(
            InstanceRecord::new(blade, blade_vertices.len() as u32)
                .with_instances(instance_buffer, instances.len() as u32)
                .with_material(MaterialType::Masked, LevelOfDetail::Full),
        );

        let interface = Arc::new(InstanceStore::new());
        interface.push(InstanceRecord::new(panel, panel_vertices.len() as u32));

        let mut registry = ProducerRegistry::new();
        registry.register(ProducerKind::Models, models.clone());
        registry.register(ProducerKind::Terrain, terrain);
        registry.register(ProducerKind::Vegetation, vegetation);
        registry.register(ProducerKind::UserInterface, interface);

        let mut waits = WaitPoints::new();
        let model_culling = waits.register(ProducerTask::ModelCulling);
        let shadow_culling = waits.register(ProducerTask::ShadowCulling);

        log::info!(
            "Scene: {} models, {} terrain patches, {} grass blades",
            MODEL_COUNT,
            terrain_vertices.len() / 4,
            instances.len()
        );
        Ok(Self {
            models,
            registry,
            waits,
            model_culling,
            shadow_culling,
            buffers: vec![cube, terrain_buffer, blade, instance_buffer, panel],
        })
    }

    pub fn producers(&self) -> &ProducerRegistry {
        &self.registry
    }

    pub fn waits(&self) -> &WaitPoints {
        &self.waits
    }

    /// Re-arm the culling signals before a frame starts
    pub fn begin_frame(&self) {
        self.waits.reset_all();
    }

    /// Cull models for this frame and signal the passes waiting on it
    pub fn cull(&self, eye: Point3<f32>, forward: Vector3<f32>, focus: Point3<f32>) {
        self.models.update(|records| {
            for record in records.iter_mut() {
                record.visibility = classify(&translation_of(&record.transform), &eye, &forward, &focus);
            }
        });
        self.shadow_culling.signal();
        self.model_culling.signal();
    }

    pub fn release(&mut self, context: &mut RenderContext) -> Result<()> {
        for buffer in self.buffers.drain(..) {
            context.factory_mut().destroy_buffer(buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_has_outward_normals() {
        let vertices = cube_vertices();
        assert_eq!(vertices.len(), 36);
        for vertex in &vertices {
            let position = Vector3::from(vertex.position);
            assert!(position.dot(&Vector3::from(vertex.normal)) > 0.0);
        }
    }

    #[test]
    fn test_terrain_is_four_point_patches() {
        let vertices = terrain_patches();
        assert_eq!(vertices.len() as u32, TERRAIN_PATCHES * TERRAIN_PATCHES * 4);
    }

    #[test]
    fn test_classify_splits_camera_and_shadow() {
        let eye = Point3::new(0.0, 0.0, 10.0);
        let forward = -Vector3::z();
        let focus = Point3::origin();
        let ahead = classify(&Point3::origin(), &eye, &forward, &focus);
        assert!(ahead.contains(VisibilityFlags::CAMERA | VisibilityFlags::SHADOW_MAP_0));

        let behind = classify(&Point3::new(0.0, 0.0, 15.0), &eye, &forward, &focus);
        assert!(!behind.contains(VisibilityFlags::CAMERA));
        assert!(behind.contains(VisibilityFlags::SHADOW_MAP_0));

        let far_behind = classify(&Point3::new(0.0, 0.0, 40.0), &eye, &forward, &focus);
        assert!(far_behind.is_empty());
    }

    #[test]
    fn test_grass_instances_stay_on_patch() {
        let instances = grass_instances();
        assert_eq!(instances.len(), 64 * 64);
        for instance in &instances {
            assert!(instance.position_scale[0].abs() <= 6.5);
            assert!(instance.position_scale[2].abs() <= 6.5);
        }
    }
}
