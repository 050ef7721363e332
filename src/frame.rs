use crate::error::{Error, Result};
use crate::geometry::Rect;

/// Single-channel 8-bit intensity image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::InvalidFrame(format!(
                "expected {} samples for {}x{}, got {}",
                width * height,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Frame filled with a constant intensity.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.width + x])
        } else {
            None
        }
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = value;
        }
    }

    /// Full-frame rectangle.
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f32, self.height as f32)
    }

    /// Checks that `roi` is non-empty and lies inside the frame.
    pub fn check_roi(&self, roi: &Rect) -> Result<()> {
        if roi.is_empty() || !roi.x.is_finite() || !roi.y.is_finite() {
            return Err(Error::InvalidRoi(format!("{roi:?} is empty")));
        }
        let bounds = self.bounds();
        if roi.left() < bounds.left()
            || roi.top() < bounds.top()
            || roi.right() > bounds.right()
            || roi.bottom() > bounds.bottom()
        {
            return Err(Error::InvalidRoi(format!(
                "{roi:?} exceeds frame {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}
