//! Mosaic rendering: tile the slices of a volume into one grayscale image.

use image::{GrayImage, Luma};
use std::path::Path;

use crate::volume::Volume3D;
use crate::Result;

impl Volume3D {
    /// Render the z-slices as a near-square mosaic.
    ///
    /// Values are windowed to the volume minimum/maximum and mapped to
    /// 8-bit grayscale. Unused tiles in the last row stay black.
    pub fn mosaic(&self) -> GrayImage {
        let (nx, ny, nz) = self.shape();
        let cols = (nz as f64).sqrt().ceil() as usize;
        let rows = nz.div_ceil(cols.max(1)).max(1);

        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for &v in self.data().iter() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        let range = if hi > lo { hi - lo } else { 1.0 };

        let mut img = GrayImage::new((cols * nx) as u32, (rows * ny) as u32);
        for k in 0..nz {
            let tile_x = (k % cols) * nx;
            let tile_y = (k / cols) * ny;
            for j in 0..ny {
                for i in 0..nx {
                    let v = self.data()[(i, j, k)];
                    let g = ((v - lo) / range * 255.0).clamp(0.0, 255.0) as u8;
                    img.put_pixel((tile_x + i) as u32, (tile_y + j) as u32, Luma([g]));
                }
            }
        }
        img
    }

    /// Render the mosaic and write it as a PNG file.
    pub fn save_mosaic<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        tracing::debug!(path = %path.as_ref().display(), "writing mosaic");
        self.mosaic().save(path.as_ref())?;
        Ok(())
    }
}
