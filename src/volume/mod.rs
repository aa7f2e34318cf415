pub mod assemble;
pub mod npy;
pub mod sparse;

// Re-export commonly used items
pub use assemble::{assemble, AssembleError};
pub use sparse::{decode, decode_file, BlockRecord, ContentFlag, DecodeError, Granularity, GridHeader};

use std::ops::Range;

/// Largest volume built from dimensions read off external input.
pub const MAX_VOXELS: usize = 1 << 31;

/// Number of voxels in a volume of size `dims`, or `None` on overflow.
pub fn voxel_count(dims: [usize; 3]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

/// Dense binary occupancy volume.
///
/// Axis order is always (x, y, z). Storage is C-order with z varying fastest,
/// so the flat index of `(x, y, z)` is `(x * ny + y) * nz + z`. This is also the
/// byte order sent to workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    dims: [usize; 3],
    data: Vec<u8>,
}

impl Volume {
    /// Creates an all-background volume.
    pub fn zeros(dims: [usize; 3]) -> Self {
        Self::filled(dims, 0)
    }

    /// Creates a volume where every voxel holds `value`.
    pub fn filled(dims: [usize; 3], value: u8) -> Self {
        Self {
            dims,
            data: vec![value; dims[0] * dims[1] * dims[2]],
        }
    }

    /// Wraps an existing C-order buffer. Returns `None` if the length does not
    /// match the dimensions.
    pub fn from_raw(dims: [usize; 3], data: Vec<u8>) -> Option<Self> {
        if voxel_count(dims) != Some(data.len()) {
            return None;
        }
        Some(Self { dims, data })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.dims[1] + y) * self.dims[2] + z
    }

    /// Returns the voxel value at `(x, y, z)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> u8 {
        self.data[self.index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: u8) {
        let idx = self.index(x, y, z);
        self.data[idx] = value;
    }

    /// Copies the half-open region `ranges` into a new volume.
    /// Ranges are clamped to the volume bounds.
    pub fn slice(&self, ranges: [Range<usize>; 3]) -> Volume {
        let [rx, ry, rz] = ranges;
        let clamp = |r: Range<usize>, n: usize| {
            let start = r.start.min(n);
            start..r.end.min(n).max(start)
        };
        let rx = clamp(rx, self.dims[0]);
        let ry = clamp(ry, self.dims[1]);
        let rz = clamp(rz, self.dims[2]);

        let dims = [rx.len(), ry.len(), rz.len()];
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for x in rx {
            for y in ry.clone() {
                let start = self.index(x, y, rz.start);
                data.extend_from_slice(&self.data[start..start + dims[2]]);
            }
        }

        Volume { dims, data }
    }

    /// Copies `block` into this volume with its origin at `origin`.
    /// The block must fit entirely inside the volume.
    pub fn write_region(&mut self, origin: [usize; 3], block: &Volume) {
        let [bx, by, bz] = block.dims;
        for x in 0..bx {
            for y in 0..by {
                let src = block.index(x, y, 0);
                let dst = self.index(origin[0] + x, origin[1] + y, origin[2]);
                self.data[dst..dst + bz].copy_from_slice(&block.data[src..src + bz]);
            }
        }
    }

    /// Fills the region of size `extent` at `origin` with `value`.
    pub fn fill_region(&mut self, origin: [usize; 3], extent: [usize; 3], value: u8) {
        for x in origin[0]..origin[0] + extent[0] {
            for y in origin[1]..origin[1] + extent[1] {
                let start = self.index(x, y, origin[2]);
                self.data[start..start + extent[2]].fill(value);
            }
        }
    }

    /// Number of non-zero voxels.
    pub fn count_foreground(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Returns `Some(0)` if every voxel is background, `Some(1)` if every voxel
    /// is foreground and `None` if the volume is mixed or empty.
    pub fn uniformity(&self) -> Option<u8> {
        if self.data.is_empty() {
            return None;
        }
        let foreground = self.count_foreground();
        if foreground == 0 {
            Some(0)
        } else if foreground == self.data.len() {
            Some(1)
        } else {
            None
        }
    }

    pub fn max_value(&self) -> u8 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Max-pools over non-overlapping `factor`-sized cubes.
    /// Dimensions must be multiples of `factor`.
    pub fn downsample_max(&self, factor: usize) -> Volume {
        let dims = self.dims.map(|d| d / factor);
        let mut out = Volume::zeros(dims);
        for x in 0..self.dims[0] {
            for y in 0..self.dims[1] {
                for z in 0..self.dims[2] {
                    let v = self.get(x, y, z);
                    if v == 0 {
                        continue;
                    }
                    let (ox, oy, oz) = (x / factor, y / factor, z / factor);
                    if v > out.get(ox, oy, oz) {
                        out.set(ox, oy, oz, v);
                    }
                }
            }
        }
        out
    }

    /// Reverses the axis order: `out[c][b][a] = self[a][b][c]`.
    pub fn reversed_axes(&self) -> Volume {
        let [nx, ny, nz] = self.dims;
        let mut out = Volume::zeros([nz, ny, nx]);
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    out.set(z, y, x, self.get(x, y, z));
                }
            }
        }
        out
    }

    /// Logical NOT of every voxel.
    pub fn inverted(&self) -> Volume {
        Volume {
            dims: self.dims,
            data: self.data.iter().map(|&v| u8::from(v == 0)).collect(),
        }
    }
}
