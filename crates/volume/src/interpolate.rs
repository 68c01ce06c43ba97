//! Voxel sampling at continuous indices.

use ndarray::Array3;

/// Interpolation scheme used when sampling between voxel centres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Nearest-neighbour: the value of the closest voxel.
    Nearest,
    /// Trilinear interpolation of the 8 surrounding voxels.
    #[default]
    Linear,
}

/// How samples outside the volume extent are handled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Boundary {
    /// Fill with a constant value.
    Constant(f32),
    /// Clamp to the nearest edge voxel.
    Nearest,
}

impl Default for Boundary {
    fn default() -> Self {
        Boundary::Constant(0.0)
    }
}

/// Fetch a voxel at integer coordinates, applying the boundary mode when
/// the coordinates fall outside the array.
fn at(data: &Array3<f32>, i: i64, j: i64, k: i64, boundary: Boundary) -> f32 {
    let (nx, ny, nz) = data.dim();
    let inside = i >= 0
        && j >= 0
        && k >= 0
        && (i as usize) < nx
        && (j as usize) < ny
        && (k as usize) < nz;
    if inside {
        return data[(i as usize, j as usize, k as usize)];
    }
    match boundary {
        Boundary::Constant(value) => value,
        Boundary::Nearest => {
            let ci = i.clamp(0, nx as i64 - 1) as usize;
            let cj = j.clamp(0, ny as i64 - 1) as usize;
            let ck = k.clamp(0, nz as i64 - 1) as usize;
            data[(ci, cj, ck)]
        }
    }
}

/// Sample the array at a continuous index.
pub(crate) fn sample(
    data: &Array3<f32>,
    index: [f64; 3],
    interpolation: Interpolation,
    boundary: Boundary,
) -> f32 {
    match interpolation {
        Interpolation::Nearest => {
            let i = index[0].round() as i64;
            let j = index[1].round() as i64;
            let k = index[2].round() as i64;
            at(data, i, j, k, boundary)
        }
        Interpolation::Linear => {
            let x0 = index[0].floor();
            let y0 = index[1].floor();
            let z0 = index[2].floor();
            let wx = (index[0] - x0) as f32;
            let wy = (index[1] - y0) as f32;
            let wz = (index[2] - z0) as f32;
            let (i, j, k) = (x0 as i64, y0 as i64, z0 as i64);

            // Gather the 8 corner values
            let v000 = at(data, i, j, k, boundary);
            let v100 = at(data, i + 1, j, k, boundary);
            let v010 = at(data, i, j + 1, k, boundary);
            let v110 = at(data, i + 1, j + 1, k, boundary);
            let v001 = at(data, i, j, k + 1, boundary);
            let v101 = at(data, i + 1, j, k + 1, boundary);
            let v011 = at(data, i, j + 1, k + 1, boundary);
            let v111 = at(data, i + 1, j + 1, k + 1, boundary);

            // Interpolate along x, then y, then z
            let c00 = v000 * (1.0 - wx) + v100 * wx;
            let c10 = v010 * (1.0 - wx) + v110 * wx;
            let c01 = v001 * (1.0 - wx) + v101 * wx;
            let c11 = v011 * (1.0 - wx) + v111 * wx;

            let c0 = c00 * (1.0 - wy) + c10 * wy;
            let c1 = c01 * (1.0 - wy) + c11 * wy;

            c0 * (1.0 - wz) + c1 * wz
        }
    }
}
