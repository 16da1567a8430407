use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// A still image sampled from a clip. Cloning shares the decoded pixels.
#[derive(Clone, Debug)]
pub struct Frame {
    index: usize,
    offset: Duration,
    image: Arc<DynamicImage>,
}

impl Frame {
    pub fn new(index: usize, offset: Duration, image: DynamicImage) -> Self {
        Self {
            index,
            offset,
            image: Arc::new(image),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Position of the frame inside its clip.
    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// JPEG encoding used for upload. Alpha is dropped since JPEG has none.
    pub fn to_jpeg(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(self.image.to_rgb8())
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    #[test]
    fn cloning_frame_shares_image_buffer() {
        let img: DynamicImage = DynamicImage::ImageRgb8(
            ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(16, 16, Rgb([1, 2, 3])),
        );
        let f1 = Frame::new(0, Duration::from_millis(500), img);
        let f2 = f1.clone();
        assert!(Arc::ptr_eq(&f1.image, &f2.image));
    }

    #[test]
    fn encodes_images_with_alpha_as_jpeg() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(
            8,
            8,
            Rgba([10, 20, 30, 128]),
        ));
        let jpeg = Frame::new(0, Duration::ZERO, img).to_jpeg().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
