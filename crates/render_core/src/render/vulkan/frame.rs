//! Frame-in-flight bookkeeping
//!
//! Tracks which slot is being recorded and which swapchain image it acquired.
//! Kept free of Vulkan calls so the begin/end protocol can be checked directly.

use super::{VulkanError, VulkanResult};

/// Position in the ring of frame slots plus the acquired image, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCursor {
    frame: usize,
    frame_count: usize,
    image_index: Option<u32>,
}

impl FrameCursor {
    /// Start at slot 0 of `frame_count` slots
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame: 0,
            frame_count: frame_count.max(1),
            image_index: None,
        }
    }

    /// Slot that the next begin (or the current recording) uses
    pub fn current(&self) -> usize {
        self.frame
    }

    /// Image acquired by the frame being recorded
    pub fn acquired_image(&self) -> Option<u32> {
        self.image_index
    }

    /// Whether a frame is between begin and end
    pub fn is_recording(&self) -> bool {
        self.image_index.is_some()
    }

    /// Record that the current slot acquired `image_index`
    pub fn begin(&mut self, image_index: u32) -> VulkanResult<()> {
        if let Some(pending) = self.image_index {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "draw_begin called while frame {} still holds image {pending}",
                    self.frame
                ),
            });
        }
        self.image_index = Some(image_index);
        Ok(())
    }

    /// Image that `end` will present, or an error when no frame was begun
    pub fn require_acquired(&self) -> VulkanResult<u32> {
        self.image_index.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "draw_end called without a matching draw_begin".to_string(),
        })
    }

    /// Drop the acquired image and move to the next slot
    pub fn finish(&mut self) {
        self.image_index = None;
        self.frame = (self.frame + 1) % self.frame_count;
    }

    /// End a frame that will not be submitted
    ///
    /// Returns the image the slot had acquired; its acquire semaphore is still
    /// signaled and must be consumed before the slot is reused. `None` when no
    /// frame was being recorded, in which case the cursor does not move.
    pub fn abandon(&mut self) -> Option<u32> {
        let image_index = self.image_index?;
        self.finish();
        Some(image_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::types::FRAMES_IN_FLIGHT;

    #[test]
    fn test_hundred_frames_alternate_slots() {
        let mut cursor = FrameCursor::new(FRAMES_IN_FLIGHT);
        let mut slots = Vec::new();

        for i in 0..100u32 {
            let slot = cursor.current();
            cursor.begin(i % 3).unwrap();
            assert_eq!(cursor.current(), slot);
            assert_eq!(cursor.require_acquired().unwrap(), i % 3);
            cursor.finish();
            slots.push(slot);
        }

        let expected: Vec<usize> = (0..100).map(|i| i % 2).collect();
        assert_eq!(slots, expected);
    }

    #[test]
    fn test_end_without_begin_is_rejected() {
        let cursor = FrameCursor::new(FRAMES_IN_FLIGHT);
        assert!(cursor.require_acquired().is_err());
        assert!(!cursor.is_recording());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut cursor = FrameCursor::new(FRAMES_IN_FLIGHT);
        cursor.begin(0).unwrap();
        assert!(cursor.begin(1).is_err());
        assert_eq!(cursor.acquired_image(), Some(0));
    }

    #[test]
    fn test_abandoned_frame_frees_its_slot() {
        let mut cursor = FrameCursor::new(FRAMES_IN_FLIGHT);
        assert_eq!(cursor.abandon(), None);
        assert_eq!(cursor.current(), 0);

        cursor.begin(1).unwrap();
        assert_eq!(cursor.abandon(), Some(1));
        assert!(!cursor.is_recording());
        assert_eq!(cursor.current(), 1);

        cursor.begin(2).unwrap();
        cursor.finish();
        assert_eq!(cursor.current(), 0);
        assert!(cursor.begin(0).is_ok());
    }

    #[test]
    fn test_finish_clears_image() {
        let mut cursor = FrameCursor::new(FRAMES_IN_FLIGHT);
        cursor.begin(2).unwrap();
        cursor.finish();
        assert_eq!(cursor.acquired_image(), None);
        assert_eq!(cursor.current(), 1);
    }
}
