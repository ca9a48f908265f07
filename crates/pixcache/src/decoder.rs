//! Turning fetched bytes into decoded assets.

use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::Arc;

use image::{DynamicImage, ImageReader};

use crate::error::{DecodeError, DecodeResult};

/// Where the bytes to decode come from.
#[derive(Debug)]
pub enum DecodeSource {
    /// Committed disk entry, read from the start
    Stream(File),
    /// Bytes downloaded straight into memory
    Bytes(Vec<u8>),
}

impl DecodeSource {
    /// Read the whole source into memory.
    pub fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self {
            DecodeSource::Bytes(bytes) => Ok(bytes),
            DecodeSource::Stream(mut file) => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

/// Decodes a source into a shareable asset.
pub trait Decoder: Send + Sync {
    /// Decoded value handed to callers and kept in the memory tier
    type Asset: Clone + Send + Sync + 'static;

    /// Decode at the source's native dimensions.
    fn decode_exact(&self, source: DecodeSource) -> DecodeResult<Self::Asset>;

    /// Decode downsampled to fit within `max_width` x `max_height`.
    fn decode_bounded(
        &self,
        source: DecodeSource,
        max_width: u32,
        max_height: u32,
    ) -> DecodeResult<Self::Asset>;

    /// Memory cost of an asset, used for the memory tier bound.
    fn asset_size(&self, asset: &Self::Asset) -> usize;
}

/// Decoder backed by the `image` crate.
///
/// Bounded decodes preserve aspect ratio and never upscale.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode(source: DecodeSource) -> DecodeResult<DynamicImage> {
        let image = match source {
            DecodeSource::Bytes(bytes) => image::load_from_memory(&bytes)?,
            DecodeSource::Stream(file) => ImageReader::new(BufReader::new(file))
                .with_guessed_format()?
                .decode()?,
        };
        Ok(image)
    }
}

impl Decoder for ImageDecoder {
    type Asset = Arc<DynamicImage>;

    fn decode_exact(&self, source: DecodeSource) -> DecodeResult<Self::Asset> {
        Ok(Arc::new(Self::decode(source)?))
    }

    fn decode_bounded(
        &self,
        source: DecodeSource,
        max_width: u32,
        max_height: u32,
    ) -> DecodeResult<Self::Asset> {
        if max_width == 0 || max_height == 0 {
            return Err(DecodeError::InvalidBounds {
                max_width,
                max_height,
            });
        }

        let image = Self::decode(source)?;
        if image.width() <= max_width && image.height() <= max_height {
            return Ok(Arc::new(image));
        }
        Ok(Arc::new(image.thumbnail(max_width, max_height)))
    }

    fn asset_size(&self, asset: &Self::Asset) -> usize {
        asset.as_bytes().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::{Cursor, Seek, SeekFrom, Write};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_exact_from_bytes() {
        let decoder = ImageDecoder::new();
        let asset = decoder
            .decode_exact(DecodeSource::Bytes(png_bytes(40, 20)))
            .unwrap();
        assert_eq!((asset.width(), asset.height()), (40, 20));
        assert_eq!(decoder.asset_size(&asset), 40 * 20 * 3);
    }

    #[test]
    fn test_decode_bounded_preserves_aspect_ratio() {
        let decoder = ImageDecoder::new();
        let asset = decoder
            .decode_bounded(DecodeSource::Bytes(png_bytes(400, 200)), 100, 100)
            .unwrap();
        assert!(asset.width() <= 100 && asset.height() <= 100);
        assert_eq!(asset.width(), 100);
        assert_eq!(asset.height(), 50);
    }

    #[test]
    fn test_decode_bounded_never_upscales() {
        let decoder = ImageDecoder::new();
        let asset = decoder
            .decode_bounded(DecodeSource::Bytes(png_bytes(30, 10)), 100, 100)
            .unwrap();
        assert_eq!((asset.width(), asset.height()), (30, 10));
    }

    #[test]
    fn test_decode_from_stream() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&png_bytes(8, 8)).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let asset = ImageDecoder::new()
            .decode_exact(DecodeSource::Stream(file))
            .unwrap();
        assert_eq!((asset.width(), asset.height()), (8, 8));
    }

    #[test]
    fn test_garbage_is_an_error() {
        let decoder = ImageDecoder::new();
        assert!(decoder
            .decode_exact(DecodeSource::Bytes(b"not an image".to_vec()))
            .is_err());
        assert!(matches!(
            decoder.decode_bounded(DecodeSource::Bytes(png_bytes(4, 4)), 0, 10),
            Err(DecodeError::InvalidBounds { .. })
        ));
    }
}
