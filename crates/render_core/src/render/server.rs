//! Rendering server
//!
//! Public façade of the renderer. Resources are created and mutated through
//! typed handles; every call validates its handles, forwards the GPU work to
//! the [`GraphicsDevice`] and keeps the device-side objects in its own
//! tables. Invalid handles are logged and ignored.

use crate::foundation::collections::{
    DirectionalLightId, HandleAllocator, MaterialId, MeshId, MeshInstanceId, PointLightId, TextureId,
};
use crate::foundation::math::{Mat4, Mat4Ext, Vec3};

use super::backend::GraphicsDevice;
use super::camera::Camera;
use super::image::{Image, ImageFormat};
use super::types::{DirectionalLightData, LightData, MeshPushConstants, Vertex, MAX_LIGHT_COUNT};
use super::RenderResult;
use ash::vk;

struct Primitive<D: GraphicsDevice> {
    vertex_buffer: D::Buffer,
    index_buffer: D::Buffer,
    index_count: u32,
    material: MaterialId,
}

struct Mesh<D: GraphicsDevice> {
    primitives: Vec<Primitive<D>>,
}

#[derive(Debug, Clone, Copy)]
struct MeshInstance {
    mesh: MeshId,
    transform: Mat4,
}

struct Material<D: GraphicsDevice> {
    albedo_set: D::MaterialSet,
}

macro_rules! require_valid {
    ($table:expr, $handle:expr, $what:literal) => {
        if !$table.has($handle) {
            log::error!("{} {:?} is not a valid resource", $what, $handle);
            return;
        }
    };
}

/// Handle-based renderer front end over a [`GraphicsDevice`]
pub struct RenderingServer<D: GraphicsDevice> {
    camera: Camera,
    meshes: HandleAllocator<MeshId, Mesh<D>>,
    mesh_instances: HandleAllocator<MeshInstanceId, MeshInstance>,
    point_lights: HandleAllocator<PointLightId, LightData>,
    directional_lights: HandleAllocator<DirectionalLightId, DirectionalLightData>,
    textures: HandleAllocator<TextureId, D::Texture>,
    materials: HandleAllocator<MaterialId, Material<D>>,
    fallback_texture: Option<D::Texture>,
    width: u32,
    height: u32,
    device: D,
}

/// Index count as drawn, `None` when it does not fit the 32-bit draw parameter
fn index_count(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

impl<D: GraphicsDevice> RenderingServer<D> {
    /// Wrap a device; call [`RenderingServer::window_init`] before drawing
    pub fn new(device: D) -> Self {
        Self {
            camera: Camera::default(),
            meshes: HandleAllocator::new(),
            mesh_instances: HandleAllocator::new(),
            point_lights: HandleAllocator::new(),
            directional_lights: HandleAllocator::new(),
            textures: HandleAllocator::new(),
            materials: HandleAllocator::new(),
            fallback_texture: None,
            width: 0,
            height: 0,
            device,
        }
    }

    /// Underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Current camera state
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Record the initial window size, create the fallback white texture and
    /// upload the initial light buffer
    pub fn window_init(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.width = width;
        self.height = height;

        if self.fallback_texture.is_none() {
            let white = Image::solid_color(1, 1, [255, 255, 255, 255]);
            self.fallback_texture = Some(self.device.texture_create(&white)?);
        }

        self.update_lights();
        log::info!("Rendering server initialized at {width}x{height}");
        Ok(())
    }

    /// Forward a new window size to the device
    pub fn window_resized(&mut self, width: u32, height: u32) {
        self.device.window_resize(width, height);
        self.width = width;
        self.height = height;
    }

    // Camera

    /// Set the camera-to-world transform
    pub fn camera_set_transform(&mut self, transform: Mat4) {
        self.camera.transform = transform;
    }

    /// Set the vertical field of view in radians
    pub fn camera_set_fov_y(&mut self, fov_y: f32) {
        self.camera.fov_y = fov_y;
    }

    /// Set the near plane distance
    pub fn camera_set_z_near(&mut self, z_near: f32) {
        self.camera.z_near = z_near;
    }

    /// Set the far plane distance
    pub fn camera_set_z_far(&mut self, z_far: f32) {
        self.camera.z_far = z_far;
    }

    // Meshes

    /// Create an empty mesh
    pub fn mesh_create(&mut self) -> MeshId {
        self.meshes.insert(Mesh {
            primitives: Vec::new(),
        })
    }

    /// Upload geometry and append it to `mesh` as a primitive drawn with
    /// `material`
    pub fn mesh_add_primitive(&mut self, mesh: MeshId, vertices: &[Vertex], indices: &[u32], material: MaterialId) {
        require_valid!(self.meshes, mesh, "Mesh");
        require_valid!(self.materials, material, "Material");

        if vertices.is_empty() || indices.is_empty() {
            log::warn!(
                "Ignoring primitive with {} vertices and {} indices for mesh {mesh:?}",
                vertices.len(),
                indices.len()
            );
            return;
        }
        let Some(index_count) = index_count(indices.len()) else {
            log::warn!("Ignoring primitive with {} indices for mesh {mesh:?}", indices.len());
            return;
        };

        let Some(vertex_buffer) = self.upload_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, bytemuck::cast_slice(vertices))
        else {
            return;
        };
        let Some(index_buffer) = self.upload_buffer(vk::BufferUsageFlags::INDEX_BUFFER, bytemuck::cast_slice(indices))
        else {
            self.device.buffer_destroy(vertex_buffer);
            return;
        };

        let primitive = Primitive {
            vertex_buffer,
            index_buffer,
            index_count,
            material,
        };
        if let Some(mesh) = self.meshes.get_mut(mesh) {
            mesh.primitives.push(primitive);
        }
    }

    fn upload_buffer(&mut self, usage: vk::BufferUsageFlags, data: &[u8]) -> Option<D::Buffer> {
        let buffer = match self.device.buffer_create(usage, data.len() as u64) {
            Ok(buffer) => buffer,
            Err(err) => {
                log::error!("Failed to create {usage:?} buffer: {err}");
                return None;
            }
        };

        if let Err(err) = self.device.buffer_send(&buffer, data) {
            log::error!("Failed to upload {usage:?} buffer: {err}");
            self.device.buffer_destroy(buffer);
            return None;
        }
        Some(buffer)
    }

    /// Free a mesh and every primitive buffer it owns
    pub fn mesh_free(&mut self, mesh: MeshId) {
        let Some(mesh) = self.meshes.remove(mesh) else {
            log::error!("Mesh {mesh:?} is not a valid resource");
            return;
        };

        for primitive in mesh.primitives {
            self.device.buffer_destroy(primitive.vertex_buffer);
            self.device.buffer_destroy(primitive.index_buffer);
        }
    }

    // Mesh instances

    /// Create an instance with no mesh and an identity transform
    pub fn mesh_instance_create(&mut self) -> MeshInstanceId {
        self.mesh_instances.insert(MeshInstance {
            mesh: MeshId::default(),
            transform: Mat4::identity(),
        })
    }

    /// Point an instance at a mesh
    pub fn mesh_instance_set_mesh(&mut self, mesh_instance: MeshInstanceId, mesh: MeshId) {
        require_valid!(self.mesh_instances, mesh_instance, "MeshInstance");
        require_valid!(self.meshes, mesh, "Mesh");

        if let Some(instance) = self.mesh_instances.get_mut(mesh_instance) {
            instance.mesh = mesh;
        }
    }

    /// Set an instance's object-to-world transform
    pub fn mesh_instance_set_transform(&mut self, mesh_instance: MeshInstanceId, transform: Mat4) {
        require_valid!(self.mesh_instances, mesh_instance, "MeshInstance");

        if let Some(instance) = self.mesh_instances.get_mut(mesh_instance) {
            instance.transform = transform;
        }
    }

    /// Free an instance; its mesh is left alone
    pub fn mesh_instance_free(&mut self, mesh_instance: MeshInstanceId) {
        if self.mesh_instances.remove(mesh_instance).is_none() {
            log::error!("MeshInstance {mesh_instance:?} is not a valid resource");
        }
    }

    // Point lights

    /// Create a white unit-intensity light at the origin
    pub fn point_light_create(&mut self) -> PointLightId {
        let light = self.point_lights.insert(LightData::new());
        self.update_lights();
        light
    }

    fn update_point_light(&mut self, light: PointLightId, update: impl FnOnce(&mut LightData)) {
        require_valid!(self.point_lights, light, "PointLight");

        if let Some(data) = self.point_lights.get_mut(light) {
            update(data);
        }
        self.update_lights();
    }

    /// Move a point light
    pub fn point_light_set_position(&mut self, light: PointLightId, position: Vec3) {
        self.update_point_light(light, |data| data.position = position.into());
    }

    /// Set the distance at which a point light fades out
    pub fn point_light_set_range(&mut self, light: PointLightId, range: f32) {
        self.update_point_light(light, |data| data.range = range);
    }

    /// Set a point light's color
    pub fn point_light_set_color(&mut self, light: PointLightId, color: Vec3) {
        self.update_point_light(light, |data| data.color = color.into());
    }

    /// Set a point light's intensity
    pub fn point_light_set_intensity(&mut self, light: PointLightId, intensity: f32) {
        self.update_point_light(light, |data| data.intensity = intensity);
    }

    /// Free a point light
    pub fn point_light_free(&mut self, light: PointLightId) {
        if self.point_lights.remove(light).is_none() {
            log::error!("PointLight {light:?} is not a valid resource");
            return;
        }
        self.update_lights();
    }

    /// Number of live point lights, including any beyond the upload cap
    pub fn point_light_count(&self) -> usize {
        self.point_lights.len()
    }

    /// Re-upload the light buffer from the point light table
    ///
    /// At most [`MAX_LIGHT_COUNT`] lights are sent. With no lights a single
    /// zeroed entry keeps the buffer non-empty.
    fn update_lights(&mut self) {
        let mut lights: Vec<LightData> = self
            .point_lights
            .values()
            .take(MAX_LIGHT_COUNT)
            .copied()
            .collect();
        if lights.is_empty() {
            lights.push(LightData::default());
        }

        if let Err(err) = self.device.update_light_buffer(&lights) {
            log::error!("Failed to update light buffer: {err}");
        }
    }

    fn uploaded_light_count(&self) -> u32 {
        self.point_lights.len().min(MAX_LIGHT_COUNT) as u32
    }

    // Directional lights

    /// Create a white unit-intensity light pointing down -Z
    pub fn directional_light_create(&mut self) -> DirectionalLightId {
        self.directional_lights.insert(DirectionalLightData::new())
    }

    /// Set the direction a directional light travels in
    pub fn directional_light_set_direction(&mut self, light: DirectionalLightId, direction: Vec3) {
        require_valid!(self.directional_lights, light, "DirectionalLight");

        if let Some(data) = self.directional_lights.get_mut(light) {
            data.direction = direction.try_normalize(f32::EPSILON).unwrap_or(direction).into();
        }
    }

    /// Set a directional light's color
    pub fn directional_light_set_color(&mut self, light: DirectionalLightId, color: Vec3) {
        require_valid!(self.directional_lights, light, "DirectionalLight");

        if let Some(data) = self.directional_lights.get_mut(light) {
            data.color = color.into();
        }
    }

    /// Set a directional light's intensity
    pub fn directional_light_set_intensity(&mut self, light: DirectionalLightId, intensity: f32) {
        require_valid!(self.directional_lights, light, "DirectionalLight");

        if let Some(data) = self.directional_lights.get_mut(light) {
            data.intensity = intensity;
        }
    }

    /// Free a directional light
    pub fn directional_light_free(&mut self, light: DirectionalLightId) {
        if self.directional_lights.remove(light).is_none() {
            log::error!("DirectionalLight {light:?} is not a valid resource");
        }
    }

    /// Number of live directional lights
    pub fn directional_light_count(&self) -> usize {
        self.directional_lights.len()
    }

    // Textures

    /// Upload an RGBA8 image as a texture
    ///
    /// Returns `None` for any other format without touching the device.
    pub fn texture_create(&mut self, image: &Image) -> Option<TextureId> {
        if image.format() != ImageFormat::Rgba8 {
            log::warn!("Texture creation requires RGBA8, got {:?}", image.format());
            return None;
        }

        match self.device.texture_create(image) {
            Ok(texture) => Some(self.textures.insert(texture)),
            Err(err) => {
                log::error!("Failed to create texture: {err}");
                None
            }
        }
    }

    /// Free a texture's image, view and sampler
    pub fn texture_free(&mut self, texture: TextureId) {
        match self.textures.remove(texture) {
            Some(texture) => self.device.texture_destroy(texture),
            None => log::error!("Texture {texture:?} is not a valid resource"),
        }
    }

    /// Number of live textures, not counting the fallback
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    // Materials

    /// Create a material sampling `albedo`, or the white fallback texture
    /// when `albedo` is not a live texture
    pub fn material_create(&mut self, albedo: TextureId) -> Option<MaterialId> {
        let texture = match self.textures.get(albedo) {
            Some(texture) => texture,
            None => {
                log::debug!("Material albedo {albedo:?} is not a texture, using fallback");
                match self.fallback_texture.as_ref() {
                    Some(texture) => texture,
                    None => {
                        log::error!("Cannot create a material before window_init");
                        return None;
                    }
                }
            }
        };

        match self.device.material_set_create(texture) {
            Ok(albedo_set) => Some(self.materials.insert(Material { albedo_set })),
            Err(err) => {
                log::error!("Failed to allocate material descriptor set: {err}");
                None
            }
        }
    }

    /// Free a material's descriptor set
    pub fn material_free(&mut self, material: MaterialId) {
        match self.materials.remove(material) {
            Some(material) => self.device.material_set_free(material.albedo_set),
            None => log::error!("Material {material:?} is not a valid resource"),
        }
    }

    /// Number of live materials
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Number of live meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Number of live mesh instances
    pub fn mesh_instance_count(&self) -> usize {
        self.mesh_instances.len()
    }

    // Frame

    /// Render one frame of every live mesh instance
    ///
    /// Does nothing while the window has no area.
    pub fn draw(&mut self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            log::trace!("Skipping draw while minimized");
            return Ok(());
        }

        let aspect = self.width as f32 / self.height as f32;
        let projection = self.camera.projection_matrix(aspect);
        let view = self.camera.view_matrix();
        let directional = self
            .directional_lights
            .values()
            .next()
            .copied()
            .unwrap_or_default();

        self.device.update_uniform_buffer(
            &projection,
            &view,
            &self.camera.position(),
            self.uploaded_light_count(),
            directional,
        )?;

        let command_buffer = self.device.draw_begin()?;

        for (_, instance) in self.mesh_instances.iter() {
            let Some(mesh) = self.meshes.get(instance.mesh) else {
                continue;
            };

            let model_view_normal = (view * instance.transform).normal_matrix();
            self.device
                .push_constants(command_buffer, &MeshPushConstants::new(&instance.transform, &model_view_normal));

            for primitive in &mesh.primitives {
                let Some(material) = self.materials.get(primitive.material) else {
                    log::warn!("Skipping primitive with freed material {:?}", primitive.material);
                    continue;
                };
                self.device.draw_primitive(
                    command_buffer,
                    material.albedo_set,
                    &primitive.vertex_buffer,
                    &primitive.index_buffer,
                    primitive.index_count,
                );
            }
        }

        self.device.draw_end(command_buffer)
    }

    /// Release every remaining resource; the device itself survives
    fn release_all(&mut self) {
        for mesh in self.meshes.keys() {
            self.mesh_free(mesh);
        }
        for material in self.materials.keys() {
            self.material_free(material);
        }
        for texture in self.textures.keys() {
            self.texture_free(texture);
        }
        if let Some(texture) = self.fallback_texture.take() {
            self.device.texture_destroy(texture);
        }
    }
}

impl<D: GraphicsDevice> Drop for RenderingServer<D> {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle during shutdown: {err}");
        }
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::RawHandle;
    use crate::render::recording::{Call, RecordingDevice};
    use crate::render::RenderError;
    use approx::assert_relative_eq;

    fn server() -> RenderingServer<RecordingDevice> {
        let mut server = RenderingServer::new(RecordingDevice::default());
        server.window_init(800, 600).unwrap();
        server
    }

    fn quad() -> (Vec<Vertex>, Vec<u32>) {
        let vertices = vec![
            Vertex::new([-1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            Vertex::new([1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            Vertex::new([1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
            Vertex::new([-1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ];
        (vertices, vec![0, 1, 2, 2, 3, 0])
    }

    #[test]
    fn test_window_init_creates_fallback_and_zeroed_light() {
        let server = server();
        let device = server.device();

        assert_eq!(device.live_textures(), 1);
        assert_eq!(device.last_lights(), Some(&[LightData::default()][..]));
        assert_eq!(server.texture_count(), 0);
    }

    #[test]
    fn test_light_upload_is_capped() {
        let mut server = server();
        let lights: Vec<_> = (0..10).map(|_| server.point_light_create()).collect();
        server.point_light_set_intensity(lights[9], 4.0);

        assert_eq!(server.point_light_count(), 10);
        assert_eq!(server.device().last_lights().map(<[_]>::len), Some(MAX_LIGHT_COUNT));

        server.draw().unwrap();
        let uniform_counts: Vec<u32> = server
            .device()
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::UpdateUniforms { light_count, .. } => Some(*light_count),
                _ => None,
            })
            .collect();
        assert_eq!(uniform_counts, vec![MAX_LIGHT_COUNT as u32]);
    }

    #[test]
    fn test_removing_last_light_uploads_one_zeroed_entry() {
        let mut server = server();
        let light = server.point_light_create();
        server.point_light_set_position(light, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(server.device().last_lights().unwrap()[0].position, [1.0, 2.0, 3.0]);

        server.point_light_free(light);
        assert_eq!(server.device().last_lights(), Some(&[LightData::default()][..]));
    }

    #[test]
    fn test_light_mutation_on_stale_handle_is_ignored() {
        let mut server = server();
        let light = server.point_light_create();
        server.point_light_free(light);
        let uploads = server.device().light_upload_count();

        server.point_light_set_range(light, 5.0);
        server.point_light_free(light);
        assert_eq!(server.device().light_upload_count(), uploads);
    }

    #[test]
    fn test_non_rgba_texture_is_rejected_without_gpu_work() {
        let mut server = server();
        let calls_before = server.device().calls().len();

        let rgb = Image::new(2, 2, ImageFormat::Rgb8, vec![0; 12]).unwrap();
        assert_eq!(server.texture_create(&rgb), None);
        assert_eq!(server.device().calls().len(), calls_before);
    }

    #[test]
    fn test_texture_free_releases_once() {
        let mut server = server();
        let texture = server
            .texture_create(&Image::solid_color(4, 4, [10, 20, 30, 255]))
            .unwrap();
        assert_eq!(server.device().live_textures(), 2);

        server.texture_free(texture);
        server.texture_free(texture);
        assert_eq!(server.device().live_textures(), 1);
        assert_eq!(server.device().texture_destroy_count(), 1);
    }

    #[test]
    fn test_material_with_invalid_albedo_uses_fallback() {
        let mut server = server();
        let material = server.material_create(TextureId::from_raw(0)).unwrap();

        let fallback = server.device().fallback_texture_id().unwrap();
        assert!(server.device().calls().iter().any(|call| matches!(
            call,
            Call::MaterialSetCreate { texture, .. } if *texture == fallback
        )));

        server.material_free(material);
        server.material_free(material);
        assert_eq!(server.device().live_material_sets(), 0);
        assert_eq!(server.device().live_textures(), 1);
    }

    #[test]
    fn test_mesh_free_destroys_every_primitive_buffer() {
        let mut server = server();
        let material = server.material_create(TextureId::default()).unwrap();
        let mesh = server.mesh_create();
        let (vertices, indices) = quad();
        server.mesh_add_primitive(mesh, &vertices, &indices, material);
        server.mesh_add_primitive(mesh, &vertices, &indices, material);
        assert_eq!(server.device().live_buffers(), 4);

        server.mesh_free(mesh);
        assert_eq!(server.device().live_buffers(), 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_index_count_beyond_u32_is_rejected() {
        assert_eq!(index_count(6), Some(6));
        assert_eq!(index_count(u32::MAX as usize), Some(u32::MAX));
        assert_eq!(index_count(u32::MAX as usize + 1), None);
    }

    #[test]
    fn test_empty_primitive_is_rejected() {
        let mut server = server();
        let material = server.material_create(TextureId::default()).unwrap();
        let mesh = server.mesh_create();

        server.mesh_add_primitive(mesh, &[], &[0, 1, 2], material);
        assert_eq!(server.device().live_buffers(), 0);
    }

    #[test]
    fn test_draw_records_one_frame_per_call() {
        let mut server = server();
        let material = server.material_create(TextureId::default()).unwrap();
        let mesh = server.mesh_create();
        let (vertices, indices) = quad();
        server.mesh_add_primitive(mesh, &vertices, &indices, material);

        let instance = server.mesh_instance_create();
        server.mesh_instance_set_mesh(instance, mesh);
        let _empty_instance = server.mesh_instance_create();

        for _ in 0..4 {
            server.draw().unwrap();
        }

        let device = server.device();
        assert_eq!(device.frame_slots(), vec![0, 1, 0, 1]);
        let draws: Vec<u32> = device
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::DrawPrimitive { index_count, .. } => Some(*index_count),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![6; 4]);
    }

    #[test]
    fn test_failed_frames_release_their_slots() {
        let mut device = RecordingDevice::default();
        device.fail_next_frame_start();
        device.fail_next_submit();
        let mut server = RenderingServer::new(device);
        server.window_init(800, 600).unwrap();

        let material = server.material_create(TextureId::default()).unwrap();
        let mesh = server.mesh_create();
        let (vertices, indices) = quad();
        server.mesh_add_primitive(mesh, &vertices, &indices, material);
        let instance = server.mesh_instance_create();
        server.mesh_instance_set_mesh(instance, mesh);

        assert!(matches!(server.draw(), Err(RenderError::RenderingFailed(_))));
        assert!(matches!(server.draw(), Err(RenderError::RenderingFailed(_))));
        for _ in 0..4 {
            server.draw().unwrap();
        }

        let device = server.device();
        assert_eq!(device.abandoned_slots(), vec![0, 1]);
        assert_eq!(device.frame_slots(), vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_draw_is_skipped_while_minimized() {
        let mut server = server();
        server.window_resized(0, 0);
        server.draw().unwrap();

        assert!(server.device().frame_slots().is_empty());
        assert!(server
            .device()
            .calls()
            .iter()
            .any(|call| matches!(call, Call::WindowResize(0, 0))));
    }

    #[test]
    fn test_normal_matrix_handles_non_uniform_scale() {
        let mut server = server();
        server.camera_set_transform(Mat4::new_translation(&Vec3::new(0.0, 0.0, 5.0)));

        let material = server.material_create(TextureId::default()).unwrap();
        let mesh = server.mesh_create();
        let (vertices, indices) = quad();
        server.mesh_add_primitive(mesh, &vertices, &indices, material);
        let instance = server.mesh_instance_create();
        server.mesh_instance_set_mesh(instance, mesh);
        server.mesh_instance_set_transform(instance, Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 1.0, 1.0)));

        server.draw().unwrap();

        let constants = server
            .device()
            .calls()
            .iter()
            .find_map(|call| match call {
                Call::PushConstants(constants) => Some(*constants),
                _ => None,
            })
            .unwrap();

        // inverse of (translate(0,0,-5) * scale(2,1,1)), transposed
        let expected = Mat4::new(
            0.5, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 5.0, 1.0,
        );
        assert_relative_eq!(Mat4::from(constants.model_view_normal), expected, epsilon = 1e-6);
        assert_relative_eq!(
            Mat4::from(constants.model),
            Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 1.0, 1.0))
        );
    }

    #[test]
    fn test_first_directional_light_reaches_uniforms() {
        let mut server = server();
        server.draw().unwrap();
        let light = server.directional_light_create();
        server.directional_light_set_direction(light, Vec3::new(0.0, -2.0, 0.0));
        server.directional_light_set_intensity(light, 3.0);
        server.draw().unwrap();

        let directionals: Vec<DirectionalLightData> = server
            .device()
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::UpdateUniforms { directional, .. } => Some(*directional),
                _ => None,
            })
            .collect();
        assert_eq!(directionals[0].intensity, 0.0);
        assert_eq!(directionals[1].direction, [0.0, -1.0, 0.0]);
        assert_eq!(directionals[1].intensity, 3.0);
    }

    #[test]
    fn test_camera_setters_shape_projection() {
        let mut server = server();
        server.camera_set_fov_y(std::f32::consts::FRAC_PI_2);
        server.camera_set_z_near(0.5);
        server.camera_set_z_far(50.0);

        let camera = server.camera();
        assert_relative_eq!(camera.z_near, 0.5);
        assert_relative_eq!(camera.z_far, 50.0);

        // 90 degree FOV: focal length 1, Y flipped for Vulkan
        let projection = camera.projection_matrix(1.0);
        assert_relative_eq!(projection[(1, 1)].abs(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(projection[(0, 0)], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_drop_releases_everything() {
        let mut server = server();
        let texture = server
            .texture_create(&Image::solid_color(2, 2, [0, 0, 0, 255]))
            .unwrap();
        let material = server.material_create(texture).unwrap();
        let mesh = server.mesh_create();
        let (vertices, indices) = quad();
        server.mesh_add_primitive(mesh, &vertices, &indices, material);

        let stats = server.device().stats_handle();
        drop(server);

        let stats = stats.borrow();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_textures, 0);
        assert_eq!(stats.live_material_sets, 0);
    }
}
