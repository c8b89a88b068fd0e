use std::sync::Arc;

use crate::error::{Result, TraceError};
use crate::types::Position;

/// Intensity and gradient at one point of the volume.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    /// Normalized intensity in `[0, 1]`.
    pub intensity: f64,
    /// Intensity gradient, per unit of volume space.
    pub gradient: Position,
}

/// Read access to an intensity volume.
///
/// Samples outside the volume return [`TraceError::OutOfBounds`]; the search
/// treats those points as impassable.
pub trait VolumeSampler: Send + Sync {
    /// Samples the volume at `pos`.
    fn sample(&self, pos: Position) -> Result<Sample>;

    /// Distance between adjacent voxels along each axis. The search lattice uses it.
    fn spacing(&self) -> Position {
        Position::new(1.0, 1.0, 1.0)
    }
}

impl<S: VolumeSampler + ?Sized> VolumeSampler for Arc<S> {
    fn sample(&self, pos: Position) -> Result<Sample> {
        (**self).sample(pos)
    }

    fn spacing(&self) -> Position {
        (**self).spacing()
    }
}

impl<S: VolumeSampler + ?Sized> VolumeSampler for &S {
    fn sample(&self, pos: Position) -> Result<Sample> {
        (**self).sample(pos)
    }

    fn spacing(&self) -> Position {
        (**self).spacing()
    }
}

/// A fully resident voxel grid with nearest-voxel sampling.
#[derive(Clone, Debug)]
pub struct DenseVolume {
    dims: [usize; 3],
    origin: Position,
    spacing: Position,
    data: Vec<f32>,
}

impl DenseVolume {
    /// Creates a dark volume.
    pub fn new(dims: [usize; 3], origin: Position, spacing: Position) -> Self {
        Self {
            dims,
            origin,
            spacing,
            data: vec![0.0; dims[0] * dims[1] * dims[2]],
        }
    }

    /// Creates a volume whose voxel `(i, j, k)` holds `f(i, j, k)`.
    pub fn from_fn(
        dims: [usize; 3],
        origin: Position,
        spacing: Position,
        f: impl Fn(usize, usize, usize) -> f32,
    ) -> Self {
        let mut volume = Self::new(dims, origin, spacing);
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let at = volume.offset(i, j, k);
                    volume.data[at] = f(i, j, k);
                }
            }
        }
        volume
    }

    /// Voxel counts along each axis.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Intensity of a voxel, if it exists.
    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<f32> {
        if i < self.dims[0] && j < self.dims[1] && k < self.dims[2] {
            Some(self.data[self.offset(i, j, k)])
        } else {
            None
        }
    }

    /// Overwrites a voxel. Returns false when it lies outside the grid.
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f32) -> bool {
        if i < self.dims[0] && j < self.dims[1] && k < self.dims[2] {
            let at = self.offset(i, j, k);
            self.data[at] = value;
            true
        } else {
            false
        }
    }

    fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.dims[1] + j) * self.dims[0] + i
    }

    fn voxel_of(&self, pos: Position) -> Option<[usize; 3]> {
        let rel = pos - self.origin;
        let coords = [
            (rel.x / self.spacing.x).round(),
            (rel.y / self.spacing.y).round(),
            (rel.z / self.spacing.z).round(),
        ];
        let mut out = [0usize; 3];
        for axis in 0..3 {
            let c = coords[axis];
            if !c.is_finite() || c < 0.0 || c >= self.dims[axis] as f64 {
                return None;
            }
            out[axis] = c as usize;
        }
        Some(out)
    }

    fn axis_gradient(&self, voxel: [usize; 3], axis: usize) -> f64 {
        let mut lo = voxel;
        let mut hi = voxel;
        lo[axis] = voxel[axis].saturating_sub(1);
        hi[axis] = (voxel[axis] + 1).min(self.dims[axis] - 1);
        let span = (hi[axis] - lo[axis]) as f64;
        if span == 0.0 {
            return 0.0;
        }
        let step = match axis {
            0 => self.spacing.x,
            1 => self.spacing.y,
            _ => self.spacing.z,
        };
        let a = self.data[self.offset(lo[0], lo[1], lo[2])] as f64;
        let b = self.data[self.offset(hi[0], hi[1], hi[2])] as f64;
        (b - a) / (span * step)
    }
}

impl VolumeSampler for DenseVolume {
    fn sample(&self, pos: Position) -> Result<Sample> {
        let voxel = self.voxel_of(pos).ok_or(TraceError::OutOfBounds)?;
        let intensity = self.data[self.offset(voxel[0], voxel[1], voxel[2])] as f64;
        let gradient = Position::new(
            self.axis_gradient(voxel, 0),
            self.axis_gradient(voxel, 1),
            self.axis_gradient(voxel, 2),
        );
        Ok(Sample {
            intensity,
            gradient,
        })
    }

    fn spacing(&self) -> Position {
        self.spacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_voxel_sampling_and_bounds() {
        let volume = DenseVolume::from_fn(
            [4, 4, 1],
            Position::ORIGIN,
            Position::new(1.0, 1.0, 1.0),
            |i, _, _| i as f32 * 0.25,
        );
        let s = volume.sample(Position::new(2.2, 1.0, 0.0)).unwrap();
        assert_eq!(s.intensity, 0.5);
        assert!((s.gradient.x - 0.25).abs() < 1e-6);
        assert_eq!(s.gradient.y, 0.0);
        assert!(matches!(
            volume.sample(Position::new(-1.0, 0.0, 0.0)),
            Err(TraceError::OutOfBounds)
        ));
        assert!(matches!(
            volume.sample(Position::new(0.0, 3.6, 0.0)),
            Err(TraceError::OutOfBounds)
        ));
    }
}
