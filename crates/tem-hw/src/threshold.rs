//! Binary frame type and raster thresholding for DMD upload.

use crate::mirror::MirrorGeometry;
use image::{DynamicImage, GenericImageView, ImageBuffer, Pixel};

/// Mirror pixel value for a dark (tilted away) mirror.
pub const OFF: u8 = 0;
/// Mirror pixel value for a lit mirror.
pub const ON: u8 = 128;
/// First-channel values at or above this are lit.
pub const THRESHOLD: u32 = 128;

/// Read access to the first channel of a 2D raster.
pub trait Raster {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// First channel at (x, y) in the raster's native range. Callers
    /// keep `x < width()` and `y < height()`.
    fn channel0(&self, x: u32, y: u32) -> u32;
}

impl<P> Raster for ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
    P::Subpixel: Into<u32>,
{
    fn width(&self) -> u32 {
        ImageBuffer::width(self)
    }

    fn height(&self) -> u32 {
        ImageBuffer::height(self)
    }

    fn channel0(&self, x: u32, y: u32) -> u32 {
        self.get_pixel(x, y).channels()[0].into()
    }
}

impl Raster for DynamicImage {
    fn width(&self) -> u32 {
        GenericImageView::width(self)
    }

    fn height(&self) -> u32 {
        GenericImageView::height(self)
    }

    fn channel0(&self, x: u32, y: u32) -> u32 {
        // 16-bit sources are compared at native depth, not rescaled.
        match self {
            DynamicImage::ImageLuma16(img) => img.channel0(x, y),
            DynamicImage::ImageLumaA16(img) => img.channel0(x, y),
            DynamicImage::ImageRgb16(img) => img.channel0(x, y),
            DynamicImage::ImageRgba16(img) => img.channel0(x, y),
            other => u32::from(GenericImageView::get_pixel(other, x, y).0[0]),
        }
    }
}

/// One byte per mirror pixel, row-major, holding only [`OFF`] or [`ON`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    geometry: MirrorGeometry,
    data: Vec<u8>,
}

impl BinaryFrame {
    /// An all-dark frame sized to `geometry`.
    pub fn new(geometry: MirrorGeometry) -> Self {
        Self {
            geometry,
            data: vec![OFF; geometry.pixel_count()],
        }
    }

    pub fn geometry(&self) -> MirrorGeometry {
        self.geometry
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[self.index(x, y)]
    }

    pub fn count_on(&self) -> usize {
        self.data.iter().filter(|&&p| p == ON).count()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        x as usize + self.geometry.width as usize * y as usize
    }
}

impl Raster for BinaryFrame {
    fn width(&self) -> u32 {
        self.geometry.width
    }

    fn height(&self) -> u32 {
        self.geometry.height
    }

    fn channel0(&self, x: u32, y: u32) -> u32 {
        u32::from(self.get(x, y))
    }
}

/// Overwrite every pixel of `frame` from `source`.
///
/// Mirror pixels outside the source are [`OFF`]; inside, a pixel is
/// [`ON`] when the source's first channel is at least [`THRESHOLD`].
pub fn threshold_into<R: Raster + ?Sized>(source: &R, frame: &mut BinaryFrame) {
    let w = frame.geometry.width;
    if w == 0 {
        return;
    }
    let (src_w, src_h) = (source.width(), source.height());

    for (y, row) in (0u32..).zip(frame.data.chunks_exact_mut(w as usize)) {
        for (x, px) in (0u32..).zip(row.iter_mut()) {
            *px = if x >= src_w || y >= src_h {
                OFF
            } else if source.channel0(x, y) >= THRESHOLD {
                ON
            } else {
                OFF
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};

    fn geometry(width: u32, height: u32) -> MirrorGeometry {
        MirrorGeometry { width, height }
    }

    fn threshold<R: Raster + ?Sized>(source: &R, geometry: MirrorGeometry) -> BinaryFrame {
        let mut frame = BinaryFrame::new(geometry);
        threshold_into(source, &mut frame);
        frame
    }

    #[test]
    fn test_threshold_boundary() {
        let mut src = GrayImage::new(3, 1);
        src.put_pixel(0, 0, Luma([127]));
        src.put_pixel(1, 0, Luma([128]));
        src.put_pixel(2, 0, Luma([255]));

        let frame = threshold(&src, geometry(3, 1));
        assert_eq!(frame.as_bytes(), &[OFF, ON, ON]);
    }

    #[test]
    fn test_out_of_bounds_is_off() {
        let src = GrayImage::from_pixel(2, 3, Luma([255]));
        let frame = threshold(&src, geometry(5, 4));

        for y in 0..4 {
            for x in 0..5 {
                let expected = if x < 2 && y < 3 { ON } else { OFF };
                assert_eq!(frame.get(x, y), expected, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_larger_source_is_cropped() {
        let mut src = GrayImage::new(10, 10);
        src.put_pixel(1, 1, Luma([200]));
        src.put_pixel(9, 9, Luma([200]));

        let frame = threshold(&src, geometry(4, 4));
        assert_eq!(frame.count_on(), 1);
        assert_eq!(frame.get(1, 1), ON);
    }

    #[test]
    fn test_only_first_channel_sampled() {
        let mut src = RgbImage::new(2, 1);
        // Bright in green and blue, dark in red.
        src.put_pixel(0, 0, Rgb([0, 255, 255]));
        // Bright only in red.
        src.put_pixel(1, 0, Rgb([200, 0, 0]));

        let frame = threshold(&src, geometry(2, 1));
        assert_eq!(frame.as_bytes(), &[OFF, ON]);
    }

    #[test]
    fn test_sixteen_bit_compared_at_native_depth() {
        let mut src: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::new(2, 1);
        src.put_pixel(0, 0, Luma([127]));
        src.put_pixel(1, 0, Luma([300]));
        let dynamic = DynamicImage::ImageLuma16(src);

        let frame = threshold(&dynamic, geometry(2, 1));
        assert_eq!(frame.as_bytes(), &[OFF, ON]);
    }

    #[test]
    fn test_rethreshold_is_idempotent() {
        let src = GrayImage::from_fn(16, 9, |x, y| Luma([((x * 17 + y * 29) % 256) as u8]));
        let once = threshold(&src, geometry(20, 12));
        let twice = threshold(&once, geometry(20, 12));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reuse_overwrites_previous_frame() {
        let mut frame = threshold(&GrayImage::from_pixel(4, 4, Luma([255])), geometry(4, 4));
        assert_eq!(frame.count_on(), 16);

        threshold_into(&GrayImage::from_pixel(1, 1, Luma([255])), &mut frame);
        assert_eq!(frame.count_on(), 1);
    }
}
