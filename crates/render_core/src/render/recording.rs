//! Recording test double for [`GraphicsDevice`]
//!
//! Hands out numbered fake resources, tracks which are still alive and keeps a
//! log of every call so server behavior can be checked without a GPU. Frame
//! slot fences follow the same reset and signal order as the Vulkan device,
//! and a wait that could never return panics instead of hanging.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use ash::vk;

use super::backend::{BackendResult, GraphicsDevice};
use super::image::{Image, ImageFormat};
use super::types::{DirectionalLightData, LightData, MeshPushConstants, FRAMES_IN_FLIGHT};
use super::vulkan::FrameCursor;
use super::RenderError;
use crate::foundation::math::{Mat4, Vec3};

/// Fake buffer
#[derive(Debug, PartialEq, Eq)]
pub struct RecordedBuffer {
    pub id: u32,
    pub size: u64,
}

/// Fake texture
#[derive(Debug, PartialEq, Eq)]
pub struct RecordedTexture {
    pub id: u32,
    pub mip_levels: u32,
}

/// One device call
#[derive(Debug, Clone)]
pub enum Call {
    BufferCreate { id: u32, usage: vk::BufferUsageFlags, size: u64 },
    BufferSend { id: u32, len: usize },
    BufferDestroy(u32),
    TextureCreate { id: u32, width: u32, height: u32 },
    TextureDestroy(u32),
    MaterialSetCreate { set: u32, texture: u32 },
    MaterialSetFree(u32),
    UpdateUniforms { light_count: u32, directional: DirectionalLightData },
    UpdateLights(Vec<LightData>),
    DrawBegin { slot: usize },
    PushConstants(MeshPushConstants),
    DrawPrimitive { material: u32, vertex_buffer: u32, index_buffer: u32, index_count: u32 },
    DrawEnd { slot: usize },
    FrameAbandoned { slot: usize },
    WindowResize(u32, u32),
}

/// Resources still alive, shared so they can be read after the device is
/// dropped along with its server
#[derive(Debug, Default)]
pub struct LiveResources {
    pub live_buffers: usize,
    pub live_textures: usize,
    pub live_material_sets: usize,
}

#[derive(Default)]
pub struct RecordingDevice {
    calls: Vec<Call>,
    next_id: u32,
    buffers: HashSet<u32>,
    textures: HashSet<u32>,
    material_sets: HashSet<u32>,
    cursor: Option<FrameCursor>,
    unsignaled_fences: HashSet<usize>,
    fail_frame_start: bool,
    fail_submit: bool,
    stats: Rc<RefCell<LiveResources>>,
}

impl RecordingDevice {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn publish(&self) {
        let mut stats = self.stats.borrow_mut();
        stats.live_buffers = self.buffers.len();
        stats.live_textures = self.textures.len();
        stats.live_material_sets = self.material_sets.len();
    }

    fn cursor(&mut self) -> &mut FrameCursor {
        self.cursor.get_or_insert_with(|| FrameCursor::new(FRAMES_IN_FLIGHT))
    }

    /// Make the next `draw_begin` fail after acquiring its image
    pub fn fail_next_frame_start(&mut self) {
        self.fail_frame_start = true;
    }

    /// Make the next `draw_end` fail at queue submission
    pub fn fail_next_submit(&mut self) {
        self.fail_submit = true;
    }

    fn wait_fence(&self, slot: usize) {
        assert!(
            !self.unsignaled_fences.contains(&slot),
            "frame slot {slot} waits on a fence nothing will signal"
        );
    }

    /// Consume the acquire semaphore with an empty submission that signals
    /// the slot's fence
    fn abandon_frame(&mut self, slot: usize) {
        if self.cursor().abandon().is_some() {
            self.unsignaled_fences.remove(&slot);
            self.calls.push(Call::FrameAbandoned { slot });
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn stats_handle(&self) -> Rc<RefCell<LiveResources>> {
        Rc::clone(&self.stats)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_material_sets(&self) -> usize {
        self.material_sets.len()
    }

    pub fn texture_destroy_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::TextureDestroy(_)))
            .count()
    }

    /// Id of the first texture created, the server's fallback
    pub fn fallback_texture_id(&self) -> Option<u32> {
        self.calls.iter().find_map(|call| match call {
            Call::TextureCreate { id, .. } => Some(*id),
            _ => None,
        })
    }

    pub fn last_lights(&self) -> Option<&[LightData]> {
        self.calls.iter().rev().find_map(|call| match call {
            Call::UpdateLights(lights) => Some(lights.as_slice()),
            _ => None,
        })
    }

    pub fn light_upload_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::UpdateLights(_)))
            .count()
    }

    /// Slots whose frame was abandoned, in order
    pub fn abandoned_slots(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::FrameAbandoned { slot } => Some(*slot),
                _ => None,
            })
            .collect()
    }

    /// Frame slot of every `draw_begin`, in order
    pub fn frame_slots(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::DrawBegin { slot } => Some(*slot),
                _ => None,
            })
            .collect()
    }
}

impl GraphicsDevice for RecordingDevice {
    type Buffer = RecordedBuffer;
    type Texture = RecordedTexture;
    type MaterialSet = u32;
    type CommandBuffer = u32;

    fn buffer_create(&mut self, usage: vk::BufferUsageFlags, size: u64) -> BackendResult<RecordedBuffer> {
        if size == 0 {
            return Err(RenderError::InvalidOperation("zero-sized buffer".to_string()));
        }
        let id = self.next_id();
        self.buffers.insert(id);
        self.calls.push(Call::BufferCreate { id, usage, size });
        self.publish();
        Ok(RecordedBuffer { id, size })
    }

    fn buffer_send(&mut self, buffer: &RecordedBuffer, data: &[u8]) -> BackendResult<()> {
        assert!(self.buffers.contains(&buffer.id), "send to dead buffer {}", buffer.id);
        assert!(data.len() as u64 <= buffer.size);
        self.calls.push(Call::BufferSend {
            id: buffer.id,
            len: data.len(),
        });
        Ok(())
    }

    fn buffer_destroy(&mut self, buffer: RecordedBuffer) {
        assert!(self.buffers.remove(&buffer.id), "buffer {} destroyed twice", buffer.id);
        self.calls.push(Call::BufferDestroy(buffer.id));
        self.publish();
    }

    fn texture_create(&mut self, image: &Image) -> BackendResult<RecordedTexture> {
        if image.format() != ImageFormat::Rgba8 {
            return Err(RenderError::ResourceCreationFailed("not RGBA8".to_string()));
        }
        let id = self.next_id();
        self.textures.insert(id);
        self.calls.push(Call::TextureCreate {
            id,
            width: image.width(),
            height: image.height(),
        });
        self.publish();
        Ok(RecordedTexture {
            id,
            mip_levels: image.mip_levels(),
        })
    }

    fn texture_destroy(&mut self, texture: RecordedTexture) {
        assert!(self.textures.remove(&texture.id), "texture {} destroyed twice", texture.id);
        self.calls.push(Call::TextureDestroy(texture.id));
        self.publish();
    }

    fn material_set_create(&mut self, texture: &RecordedTexture) -> BackendResult<u32> {
        assert!(self.textures.contains(&texture.id));
        let set = self.next_id();
        self.material_sets.insert(set);
        self.calls.push(Call::MaterialSetCreate {
            set,
            texture: texture.id,
        });
        self.publish();
        Ok(set)
    }

    fn material_set_free(&mut self, set: u32) {
        assert!(self.material_sets.remove(&set), "material set {set} freed twice");
        self.calls.push(Call::MaterialSetFree(set));
        self.publish();
    }

    fn update_uniform_buffer(
        &mut self,
        _projection: &Mat4,
        _view: &Mat4,
        _view_position: &Vec3,
        light_count: u32,
        directional: DirectionalLightData,
    ) -> BackendResult<()> {
        let recording = self.cursor().is_recording();
        if !recording {
            let slot = self.cursor().current();
            self.wait_fence(slot);
        }
        self.calls.push(Call::UpdateUniforms {
            light_count,
            directional,
        });
        Ok(())
    }

    fn update_light_buffer(&mut self, lights: &[LightData]) -> BackendResult<()> {
        assert!(!lights.is_empty());
        self.calls.push(Call::UpdateLights(lights.to_vec()));
        Ok(())
    }

    fn draw_begin(&mut self) -> BackendResult<u32> {
        let slot = self.cursor().current();
        self.wait_fence(slot);
        self.cursor().begin(0)?;
        self.calls.push(Call::DrawBegin { slot });

        if std::mem::take(&mut self.fail_frame_start) {
            self.abandon_frame(slot);
            return Err(RenderError::RenderingFailed("command buffer recording failed".to_string()));
        }
        Ok(slot as u32)
    }

    fn push_constants(&mut self, _command_buffer: u32, constants: &MeshPushConstants) {
        self.calls.push(Call::PushConstants(*constants));
    }

    fn draw_primitive(
        &mut self,
        _command_buffer: u32,
        material: u32,
        vertex_buffer: &RecordedBuffer,
        index_buffer: &RecordedBuffer,
        index_count: u32,
    ) {
        self.calls.push(Call::DrawPrimitive {
            material,
            vertex_buffer: vertex_buffer.id,
            index_buffer: index_buffer.id,
            index_count,
        });
    }

    fn draw_end(&mut self, _command_buffer: u32) -> BackendResult<()> {
        let cursor = self.cursor();
        let slot = cursor.current();
        cursor
            .require_acquired()
            .map_err(|err| RenderError::InvalidOperation(err.to_string()))?;

        // Reset right before submitting; the fake GPU finishes immediately
        self.unsignaled_fences.insert(slot);
        if std::mem::take(&mut self.fail_submit) {
            self.abandon_frame(slot);
            return Err(RenderError::RenderingFailed("queue submission failed".to_string()));
        }
        self.unsignaled_fences.remove(&slot);

        self.cursor().finish();
        self.calls.push(Call::DrawEnd { slot });
        Ok(())
    }

    fn window_resize(&mut self, width: u32, height: u32) {
        self.calls.push(Call::WindowResize(width, height));
    }

    fn wait_idle(&self) -> BackendResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_end_without_begin_is_an_error() {
        let mut device = RecordingDevice::default();
        assert!(matches!(device.draw_end(0), Err(RenderError::InvalidOperation(_))));
        assert!(device.draw_begin().is_ok());
        assert!(device.draw_end(0).is_ok());
    }
}
