//! CPU-side images handed to the renderer
//!
//! Decoding goes through the `image` crate; the renderer itself only accepts
//! tightly packed 8-bit data and uploads `Rgba8` only.

use std::path::Path;

use super::{RenderError, RenderResult};

/// Pixel layout of an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Single red channel
    R8,
    /// Red and green channels
    Rg8,
    /// Packed RGB
    Rgb8,
    /// Packed RGBA
    Rgba8,
    /// Luminance
    L8,
    /// Luminance and alpha
    La8,
}

impl ImageFormat {
    /// Bytes per pixel
    pub fn channels(self) -> usize {
        match self {
            Self::R8 | Self::L8 => 1,
            Self::Rg8 | Self::La8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// Tightly packed 8-bit image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    format: ImageFormat,
    data: Vec<u8>,
}

impl Image {
    /// Wrap raw pixel data, checking that its length matches the dimensions
    pub fn new(width: u32, height: u32, format: ImageFormat, data: Vec<u8>) -> RenderResult<Self> {
        let expected = width as usize * height as usize * format.channels();
        if width == 0 || height == 0 || data.len() != expected {
            return Err(RenderError::ResourceCreationFailed(format!(
                "image data is {} bytes, expected {expected} for {width}x{height} {format:?}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Image filled with one RGBA color
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = width.max(1) as usize * height.max(1) as usize;
        Self {
            width: width.max(1),
            height: height.max(1),
            format: ImageFormat::Rgba8,
            data: color.repeat(pixel_count),
        }
    }

    /// Decode an image file and convert it to RGBA8
    pub fn from_file<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref();
        let decoded = image::open(path).map_err(|e| {
            RenderError::ResourceCreationFailed(format!("failed to load {}: {e}", path.display()))
        })?;
        log::debug!("Loaded image {}x{} from {:?}", decoded.width(), decoded.height(), path);
        Ok(decoded.into())
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Raw pixel bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of mip levels for a full chain down to 1x1
    pub fn mip_levels(&self) -> u32 {
        self.width.max(self.height).ilog2() + 1
    }

    /// Expand into RGBA8, filling missing channels the way samplers would
    /// (zero color, opaque alpha; luminance broadcast to RGB)
    pub fn to_rgba8(&self) -> Self {
        if self.format == ImageFormat::Rgba8 {
            return self.clone();
        }

        let channels = self.format.channels();
        let data = self
            .data
            .chunks_exact(channels)
            .flat_map(|px| match self.format {
                ImageFormat::R8 => [px[0], 0, 0, 255],
                ImageFormat::Rg8 => [px[0], px[1], 0, 255],
                ImageFormat::Rgb8 => [px[0], px[1], px[2], 255],
                ImageFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
                ImageFormat::L8 => [px[0], px[0], px[0], 255],
                ImageFormat::La8 => [px[0], px[0], px[0], px[1]],
            })
            .collect();

        Self {
            width: self.width,
            height: self.height,
            format: ImageFormat::Rgba8,
            data,
        }
    }
}

impl From<image::DynamicImage> for Image {
    fn from(decoded: image::DynamicImage) -> Self {
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            format: ImageFormat::Rgba8,
            data: rgba.into_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_mismatched_length() {
        assert!(Image::new(2, 2, ImageFormat::Rgb8, vec![0; 12]).is_ok());
        assert!(Image::new(2, 2, ImageFormat::Rgb8, vec![0; 16]).is_err());
        assert!(Image::new(0, 2, ImageFormat::R8, Vec::new()).is_err());
    }

    #[test]
    fn test_mip_levels() {
        assert_eq!(Image::solid_color(1, 1, [0; 4]).mip_levels(), 1);
        assert_eq!(Image::solid_color(256, 256, [0; 4]).mip_levels(), 9);
        assert_eq!(Image::solid_color(300, 17, [0; 4]).mip_levels(), 9);
        assert_eq!(Image::solid_color(3, 1024, [0; 4]).mip_levels(), 11);
    }

    #[test]
    fn test_to_rgba8_expands_channels() {
        let gray = Image::new(2, 1, ImageFormat::La8, vec![10, 20, 30, 40]).unwrap();
        let rgba = gray.to_rgba8();
        assert_eq!(rgba.format(), ImageFormat::Rgba8);
        assert_eq!(rgba.data(), &[10, 10, 10, 20, 30, 30, 30, 40]);

        let rgb = Image::new(1, 1, ImageFormat::Rgb8, vec![1, 2, 3]).unwrap();
        assert_eq!(rgb.to_rgba8().data(), &[1, 2, 3, 255]);
    }

    #[test]
    fn test_from_dynamic_image() {
        let decoded = image::DynamicImage::new_rgb8(3, 2);
        let converted = Image::from(decoded);
        assert_eq!(converted.format(), ImageFormat::Rgba8);
        assert_eq!(converted.data().len(), 3 * 2 * 4);
        assert_eq!(&converted.data()[0..4], &[0, 0, 0, 255]);
    }
}
