//! Scene loading onto the rendering server
//!
//! [`SceneData`] is already-decoded scene content: images, materials, meshes,
//! instances and lights cross-referenced by index. [`Scene::load`] turns it
//! into server resources and remembers every handle it created so
//! [`Scene::clear`] can release them again.

use thiserror::Error;

use crate::foundation::collections::{
    DirectionalLightId, MaterialId, MeshId, MeshInstanceId, PointLightId, TextureId,
};
use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
use crate::render::{GraphicsDevice, Image, ImageFormat, RenderingServer, Vertex};

/// Scene data that refers to something that does not exist
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SceneError {
    /// An index points past the end of the list it refers to
    #[error("{what} index {index} out of range ({len} available)")]
    IndexOutOfRange {
        /// Kind of item referenced
        what: &'static str,
        /// Offending index
        index: usize,
        /// Length of the referenced list
        len: usize,
    },
}

/// Material description
#[derive(Debug, Clone, Default)]
pub struct SceneMaterial {
    /// Index into [`SceneData::images`] of the albedo map
    pub albedo: Option<usize>,
}

/// Indexed triangle list drawn with one material
#[derive(Debug, Clone)]
pub struct ScenePrimitive {
    /// Interleaved vertices
    pub vertices: Vec<Vertex>,
    /// Triangle indices
    pub indices: Vec<u32>,
    /// Index into [`SceneData::materials`]
    pub material: usize,
}

/// Mesh made of primitives
#[derive(Debug, Clone, Default)]
pub struct SceneMesh {
    /// Primitives in draw order
    pub primitives: Vec<ScenePrimitive>,
}

/// Placement of a mesh
#[derive(Debug, Clone)]
pub struct SceneMeshInstance {
    /// Index into [`SceneData::meshes`]
    pub mesh: usize,
    /// Object-to-world transform
    pub transform: Mat4,
}

/// Kind of light and its kind-specific parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneLightKind {
    /// Omnidirectional light at the transform's translation
    Point {
        /// Falloff range, zero when unspecified
        range: Option<f32>,
    },
    /// Light travelling along the transform's -Z axis
    Directional,
}

/// Light description
#[derive(Debug, Clone)]
pub struct SceneLight {
    /// Point or directional
    pub kind: SceneLightKind,
    /// Light-to-world transform
    pub transform: Mat4,
    /// Linear RGB color
    pub color: Vec3,
    /// Scalar intensity
    pub intensity: f32,
}

/// Decoded scene content
#[derive(Debug, Clone, Default)]
pub struct SceneData {
    /// Images referenced by materials
    pub images: Vec<Image>,
    /// Materials referenced by primitives
    pub materials: Vec<SceneMaterial>,
    /// Meshes referenced by instances
    pub meshes: Vec<SceneMesh>,
    /// Mesh placements
    pub mesh_instances: Vec<SceneMeshInstance>,
    /// Point and directional lights
    pub lights: Vec<SceneLight>,
}

fn check_index(what: &'static str, index: usize, len: usize) -> Result<(), SceneError> {
    if index < len {
        Ok(())
    } else {
        Err(SceneError::IndexOutOfRange { what, index, len })
    }
}

impl SceneData {
    /// Check every cross reference
    pub fn validate(&self) -> Result<(), SceneError> {
        for material in &self.materials {
            if let Some(albedo) = material.albedo {
                check_index("image", albedo, self.images.len())?;
            }
        }
        for mesh in &self.meshes {
            for primitive in &mesh.primitives {
                check_index("material", primitive.material, self.materials.len())?;
            }
        }
        for instance in &self.mesh_instances {
            check_index("mesh", instance.mesh, self.meshes.len())?;
        }
        Ok(())
    }
}

/// Handles created by one [`Scene::load`]
#[derive(Debug, Default)]
pub struct Scene {
    textures: Vec<TextureId>,
    materials: Vec<MaterialId>,
    meshes: Vec<MeshId>,
    mesh_instances: Vec<MeshInstanceId>,
    point_lights: Vec<PointLightId>,
    directional_lights: Vec<DirectionalLightId>,
}

impl Scene {
    /// Create every resource described by `data` on `server`
    ///
    /// The data is validated first so nothing is created for a broken scene.
    pub fn load<D: GraphicsDevice>(server: &mut RenderingServer<D>, data: &SceneData) -> Result<Self, SceneError> {
        data.validate()?;
        let mut scene = Self::default();

        let mut image_textures: Vec<Option<Option<TextureId>>> = vec![None; data.images.len()];
        for material in &data.materials {
            let albedo = match material.albedo {
                Some(index) => *image_textures[index].get_or_insert_with(|| {
                    let texture = Self::upload_image(server, &data.images[index]);
                    scene.textures.extend(texture);
                    texture
                }),
                None => None,
            };

            // An absent albedo resolves to the server's fallback texture
            let material = server.material_create(albedo.unwrap_or_default());
            scene.materials.push(material.unwrap_or_default());
        }

        for scene_mesh in &data.meshes {
            let mesh = server.mesh_create();
            for primitive in &scene_mesh.primitives {
                server.mesh_add_primitive(
                    mesh,
                    &primitive.vertices,
                    &primitive.indices,
                    scene.materials[primitive.material],
                );
            }
            scene.meshes.push(mesh);
        }

        for scene_instance in &data.mesh_instances {
            let instance = server.mesh_instance_create();
            server.mesh_instance_set_mesh(instance, scene.meshes[scene_instance.mesh]);
            server.mesh_instance_set_transform(instance, scene_instance.transform);
            scene.mesh_instances.push(instance);
        }

        for light in &data.lights {
            match light.kind {
                SceneLightKind::Point { range } => {
                    let point_light = server.point_light_create();
                    server.point_light_set_position(point_light, light.transform.translation_part());
                    server.point_light_set_range(point_light, range.unwrap_or(0.0));
                    server.point_light_set_color(point_light, light.color);
                    server.point_light_set_intensity(point_light, light.intensity);
                    scene.point_lights.push(point_light);
                }
                SceneLightKind::Directional => {
                    let rotation = light.transform.fixed_view::<3, 3>(0, 0);
                    let direction = rotation * Vec3::new(0.0, 0.0, -1.0);

                    let directional_light = server.directional_light_create();
                    server.directional_light_set_direction(directional_light, direction);
                    server.directional_light_set_intensity(directional_light, light.intensity);
                    server.directional_light_set_color(directional_light, light.color);
                    scene.directional_lights.push(directional_light);
                }
            }
        }

        log::info!(
            "Loaded scene: {} textures, {} materials, {} meshes, {} instances, {} point lights, {} directional lights",
            scene.textures.len(),
            scene.materials.len(),
            scene.meshes.len(),
            scene.mesh_instances.len(),
            scene.point_lights.len(),
            scene.directional_lights.len()
        );
        Ok(scene)
    }

    fn upload_image<D: GraphicsDevice>(server: &mut RenderingServer<D>, image: &Image) -> Option<TextureId> {
        if image.format() == ImageFormat::Rgba8 {
            server.texture_create(image)
        } else {
            log::debug!("Expanding {:?} scene image to RGBA8", image.format());
            server.texture_create(&image.to_rgba8())
        }
    }

    /// Free everything this scene created
    pub fn clear<D: GraphicsDevice>(&mut self, server: &mut RenderingServer<D>) {
        for instance in self.mesh_instances.drain(..) {
            server.mesh_instance_free(instance);
        }
        for light in self.directional_lights.drain(..) {
            server.directional_light_free(light);
        }
        for light in self.point_lights.drain(..) {
            server.point_light_free(light);
        }
        for mesh in self.meshes.drain(..) {
            server.mesh_free(mesh);
        }
        for material in self.materials.drain(..) {
            server.material_free(material);
        }
        for texture in self.textures.drain(..) {
            server.texture_free(texture);
        }
    }

    /// Instances created by this scene, in load order
    pub fn mesh_instances(&self) -> &[MeshInstanceId] {
        &self.mesh_instances
    }

    /// Whether the scene currently holds no resources
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
            && self.materials.is_empty()
            && self.meshes.is_empty()
            && self.mesh_instances.is_empty()
            && self.point_lights.is_empty()
            && self.directional_lights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::recording::{Call, RecordingDevice};

    fn triangle(material: usize) -> ScenePrimitive {
        ScenePrimitive {
            vertices: vec![
                Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
                Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
                Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ],
            indices: vec![0, 1, 2],
            material,
        }
    }

    fn sample_scene() -> SceneData {
        SceneData {
            images: vec![
                Image::solid_color(4, 4, [200, 100, 50, 255]),
                Image::new(2, 2, ImageFormat::Rgb8, vec![128; 12]).unwrap(),
            ],
            materials: vec![
                SceneMaterial { albedo: Some(0) },
                SceneMaterial { albedo: Some(0) },
                SceneMaterial { albedo: Some(1) },
                SceneMaterial { albedo: None },
            ],
            meshes: vec![SceneMesh {
                primitives: vec![triangle(0), triangle(3)],
            }],
            mesh_instances: vec![
                SceneMeshInstance {
                    mesh: 0,
                    transform: Mat4::identity(),
                },
                SceneMeshInstance {
                    mesh: 0,
                    transform: Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0)),
                },
            ],
            lights: vec![
                SceneLight {
                    kind: SceneLightKind::Point { range: None },
                    transform: Mat4::new_translation(&Vec3::new(1.0, 4.0, -2.0)),
                    color: Vec3::new(1.0, 0.5, 0.25),
                    intensity: 10.0,
                },
                SceneLight {
                    kind: SceneLightKind::Directional,
                    transform: Mat4::from_axis_angle(&Vec3::x_axis(), -std::f32::consts::FRAC_PI_2),
                    color: Vec3::new(1.0, 1.0, 1.0),
                    intensity: 2.0,
                },
            ],
        }
    }

    fn server() -> RenderingServer<RecordingDevice> {
        let mut server = RenderingServer::new(RecordingDevice::default());
        server.window_init(640, 480).unwrap();
        server
    }

    #[test]
    fn test_load_creates_every_resource() {
        let mut server = server();
        let scene = Scene::load(&mut server, &sample_scene()).unwrap();

        assert_eq!(server.texture_count(), 2);
        assert_eq!(server.material_count(), 4);
        assert_eq!(server.mesh_count(), 1);
        assert_eq!(server.mesh_instance_count(), 2);
        assert_eq!(server.point_light_count(), 1);
        assert_eq!(server.directional_light_count(), 1);
        assert_eq!(scene.mesh_instances().len(), 2);
        // two primitives, vertex and index buffer each
        assert_eq!(server.device().live_buffers(), 4);
    }

    #[test]
    fn test_point_light_takes_translation_and_default_range() {
        let mut server = server();
        Scene::load(&mut server, &sample_scene()).unwrap();

        let light = server.device().last_lights().unwrap()[0];
        assert_eq!(light.position, [1.0, 4.0, -2.0]);
        assert_eq!(light.range, 0.0);
        assert_eq!(light.color, [1.0, 0.5, 0.25]);
        assert_eq!(light.intensity, 10.0);
    }

    #[test]
    fn test_directional_light_points_along_rotated_forward() {
        let mut server = server();
        Scene::load(&mut server, &sample_scene()).unwrap();
        server.draw().unwrap();

        let directional = server
            .device()
            .calls()
            .iter()
            .find_map(|call| match call {
                Call::UpdateUniforms { directional, .. } => Some(*directional),
                _ => None,
            })
            .unwrap();

        // -90 degrees about X turns -Z into -Y
        approx::assert_relative_eq!(directional.direction[0], 0.0, epsilon = 1e-6);
        approx::assert_relative_eq!(directional.direction[1], -1.0, epsilon = 1e-6);
        approx::assert_relative_eq!(directional.direction[2], 0.0, epsilon = 1e-6);
        assert_eq!(directional.intensity, 2.0);
    }

    #[test]
    fn test_clear_releases_everything_but_the_fallback() {
        let mut server = server();
        let mut scene = Scene::load(&mut server, &sample_scene()).unwrap();

        scene.clear(&mut server);
        assert!(scene.is_empty());
        assert_eq!(server.texture_count(), 0);
        assert_eq!(server.material_count(), 0);
        assert_eq!(server.mesh_count(), 0);
        assert_eq!(server.mesh_instance_count(), 0);
        assert_eq!(server.point_light_count(), 0);
        assert_eq!(server.directional_light_count(), 0);

        let device = server.device();
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_material_sets(), 0);
        assert_eq!(device.live_textures(), 1);
        assert_eq!(device.last_lights(), Some(&[crate::render::LightData::default()][..]));
    }

    #[test]
    fn test_bad_index_creates_nothing() {
        let mut server = server();
        let mut data = sample_scene();
        data.mesh_instances[1].mesh = 3;
        let calls_before = server.device().calls().len();

        assert_eq!(
            Scene::load(&mut server, &data).unwrap_err(),
            SceneError::IndexOutOfRange {
                what: "mesh",
                index: 3,
                len: 1
            }
        );
        assert_eq!(server.device().calls().len(), calls_before);
    }

    #[test]
    fn test_rgb_scene_image_is_expanded_before_upload() {
        let mut server = server();
        Scene::load(&mut server, &sample_scene()).unwrap();

        let sizes: Vec<(u32, u32)> = server
            .device()
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::TextureCreate { width, height, .. } => Some((*width, *height)),
                _ => None,
            })
            .collect();
        // fallback, image 0, image 1
        assert_eq!(sizes, vec![(1, 1), (4, 4), (2, 2)]);
    }
}
