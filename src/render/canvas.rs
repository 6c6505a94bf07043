use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

use crate::color::Rgba;

use super::geometry::Rect;

/// Software RGBA surface the spectrum is rasterised into.
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.pixels = vec![0; (width * height * 4) as usize];
        }
    }

    pub fn clear(&mut self, color: Rgba) {
        let px = color.to_array();
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[idx..idx + 4]);
        Some(px)
    }

    /// Fill `rect` with `color`, alpha-blended and clipped to the surface.
    pub fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let x_end = rect.x.saturating_add(rect.width).min(self.width);
        let y_end = rect.y.saturating_add(rect.height).min(self.height);
        let src = color.to_array();
        for y in rect.y.min(y_end)..y_end {
            for x in rect.x.min(x_end)..x_end {
                let idx = ((y * self.width + x) * 4) as usize;
                blend(&mut self.pixels[idx..idx + 4], src);
            }
        }
    }

    /// Composite an image over the surface, anchored at the top-left corner.
    pub fn blit_background(&mut self, image: &RgbaImage) {
        let w = image.width().min(self.width);
        let h = image.height().min(self.height);
        for y in 0..h {
            for x in 0..w {
                let idx = ((y * self.width + x) * 4) as usize;
                blend(&mut self.pixels[idx..idx + 4], image.get_pixel(x, y).0);
            }
        }
    }
}

fn blend(dst: &mut [u8], src: [u8; 4]) {
    if src[3] == 0 {
        return;
    }
    let a = src[3] as f32 / 255.0;
    let inv_a = 1.0 - a;
    dst[0] = (src[0] as f32 * a + dst[0] as f32 * inv_a) as u8;
    dst[1] = (src[1] as f32 * a + dst[1] as f32 * inv_a) as u8;
    dst[2] = (src[2] as f32 * a + dst[2] as f32 * inv_a) as u8;
    dst[3] = 255;
}

/// Scale and center-crop `image` so it covers a `width` x `height` surface.
pub fn cover(image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    image
        .resize_to_fill(width.max(1), height.max(1), FilterType::Triangle)
        .to_rgba8()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_is_clipped() {
        let mut canvas = Canvas::new(4, 4);
        canvas.clear(Rgba::new(0, 0, 0, 255));
        canvas.fill_rect(Rect::new(2, 2, 10, 10), Rgba::new(255, 0, 0, 255));

        assert_eq!(canvas.pixel(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(canvas.pixel(3, 3), Some([255, 0, 0, 255]));
        assert_eq!(canvas.pixel(4, 4), None);
    }

    #[test]
    fn translucent_fill_blends() {
        let mut canvas = Canvas::new(1, 1);
        canvas.clear(Rgba::new(0, 0, 200, 255));
        canvas.fill_rect(Rect::new(0, 0, 1, 1), Rgba::new(200, 0, 0, 0));
        assert_eq!(canvas.pixel(0, 0), Some([0, 0, 200, 255]));

        canvas.fill_rect(Rect::new(0, 0, 1, 1), Rgba::new(200, 0, 0, 128));
        let [r, _, b, a] = canvas.pixel(0, 0).unwrap();
        assert!((99..=101).contains(&r));
        assert!((98..=100).contains(&b));
        assert_eq!(a, 255);
    }

    #[test]
    fn blit_covers_surface() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 9, image::Rgba([10, 20, 30, 255])));
        let scaled = cover(&source, 6, 4);
        assert_eq!(scaled.dimensions(), (6, 4));

        let mut canvas = Canvas::new(6, 4);
        canvas.blit_background(&scaled);
        assert_eq!(canvas.pixel(5, 3), Some([10, 20, 30, 255]));
    }

    #[test]
    fn resize_reallocates() {
        let mut canvas = Canvas::new(2, 2);
        canvas.resize(3, 5);
        assert_eq!((canvas.width(), canvas.height()), (3, 5));
        assert_eq!(canvas.pixel(2, 4), Some([0, 0, 0, 0]));
    }
}
