use anyhow::{anyhow, Result};

use crate::geometry::BoundingBox;

/// Binary foreground mask at frame resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32, bits: Vec<bool>) -> Result<Self> {
        if bits.len() != width as usize * height as usize {
            return Err(anyhow!(
                "mask has {} cells, expected {}x{}",
                bits.len(),
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Filled rectangle `[x0, x1) x [y0, y1)`, clipped to the mask.
    pub fn from_rect(width: u32, height: u32, x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        let mut mask = Self::empty(width, height);
        let cx0 = x0.clamp(0, width as i32) as usize;
        let cx1 = x1.clamp(0, width as i32) as usize;
        let cy0 = y0.clamp(0, height as i32) as usize;
        let cy1 = y1.clamp(0, height as i32) as usize;
        for row in cy0..cy1 {
            let start = row * width as usize;
            mask.bits[start + cx0..start + cx1.max(cx0)].fill(true);
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[(y * self.width + x) as usize]
    }

    /// Number of foreground pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    /// Box spanning the foreground pixels, `None` when there are none.
    ///
    /// `w = x_max - x_min` and `h = y_max - y_min` over foreground pixel
    /// indices, so a single foreground pixel gives a zero-size box.
    pub fn extent(&self) -> Option<BoundingBox> {
        let width = self.width as usize;
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for (row, cells) in self.bits.chunks_exact(width.max(1)).enumerate() {
            let Some(first) = cells.iter().position(|&b| b) else {
                continue;
            };
            let last = cells.iter().rposition(|&b| b).unwrap_or(first);
            bounds = Some(match bounds {
                None => (first, row, last, row),
                Some((x0, y0, x1, _)) => (x0.min(first), y0, x1.max(last), row),
            });
        }
        let (x0, y0, x1, y1) = bounds?;
        Some(BoundingBox::new(
            x0 as f32,
            y0 as f32,
            (x1 - x0) as f32,
            (y1 - y0) as f32,
        ))
    }
}
