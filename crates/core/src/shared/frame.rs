use ndarray::ArrayView3;

use crate::shared::bounding_box::BoundingBox;

/// One captured image: contiguous RGB bytes in row-major order.
///
/// `index` is the capture sequence number assigned by the stream receiver
/// (enrollment images use 0). Cloning copies the pixel buffer, so a clone
/// handed to a consumer never aliases the receiver's slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn from_rgb_image(image: image::RgbImage, index: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Shrinks the frame by an integer factor with bilinear filtering.
    ///
    /// Output dimensions are rounded to the nearest pixel and never drop
    /// below 1x1.
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 {
            return self.clone();
        }
        let new_w = ((self.width as f64 / factor as f64).round() as u32).max(1);
        let new_h = ((self.height as f64 / factor as f64).round() as u32).max(1);

        match image::RgbImage::from_raw(self.width, self.height, self.data.clone()) {
            Some(img) if self.channels == 3 => {
                let resized = image::imageops::resize(
                    &img,
                    new_w,
                    new_h,
                    image::imageops::FilterType::Triangle,
                );
                Frame::from_rgb_image(resized, self.index)
            }
            _ => self.sample_nearest(new_w, new_h),
        }
    }

    /// Copies the pixels under `bbox`, clamped to the frame bounds.
    ///
    /// Returns `None` when the clamped box is empty.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let clamped = bbox.clamp_to(self.width, self.height)?;
        let c = self.channels as usize;
        let row_len = clamped.width as usize * c;
        let mut data = Vec::with_capacity(row_len * clamped.height as usize);
        for row in clamped.y as usize..(clamped.y + clamped.height) as usize {
            let start = (row * self.width as usize + clamped.x as usize) * c;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        Some(Frame::new(
            data,
            clamped.width as u32,
            clamped.height as u32,
            self.channels,
            self.index,
        ))
    }

    fn sample_nearest(&self, new_w: u32, new_h: u32) -> Frame {
        let src = self.as_ndarray();
        let c = self.channels as usize;
        let (src_w, src_h) = (self.width as usize, self.height as usize);
        let mut data = Vec::with_capacity(new_w as usize * new_h as usize * c);
        for y in 0..new_h as usize {
            let src_y = (((y as f64 + 0.5) * src_h as f64 / new_h as f64) as usize).min(src_h - 1);
            for x in 0..new_w as usize {
                let src_x =
                    (((x as f64 + 0.5) * src_w as f64 / new_w as f64) as usize).min(src_w - 1);
                for ch in 0..c {
                    data.push(src[[src_y, src_x, ch]]);
                }
            }
        }
        Frame::new(data, new_w, new_h, self.channels, self.index)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
