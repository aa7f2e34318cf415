use std::ops::Range;

/// One cell of the block grid, as half-open bounds in voxel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    pub start: [usize; 3],
    pub stop: [usize; 3],
}

impl Tile {
    /// Position of the tile's first voxel in the parent volume.
    pub fn offset(&self) -> [usize; 3] {
        self.start
    }

    /// Bounds used when slicing the tile out of a volume of size `dims`.
    ///
    /// The stop bound is treated as inclusive, so every tile with a neighbour
    /// on an axis reaches one voxel into it. The last tile on an axis is
    /// clipped to the volume.
    pub fn overlapped(&self, dims: [usize; 3]) -> [Range<usize>; 3] {
        [0, 1, 2].map(|axis| self.start[axis]..(self.stop[axis] + 1).min(dims[axis]))
    }
}

/// Splits `0..dims` on every axis into steps of `block_size`, aligned to
/// the origin. Tiles are ordered with x outermost and z innermost.
///
/// # Panics
///
/// Panics if any component of `block_size` is zero.
pub fn partition(dims: [usize; 3], block_size: [usize; 3]) -> Vec<Tile> {
    let axis_bounds = |axis: usize| -> Vec<(usize, usize)> {
        (0..dims[axis])
            .step_by(block_size[axis])
            .map(|start| (start, (start + block_size[axis]).min(dims[axis])))
            .collect()
    };

    let xs = axis_bounds(0);
    let ys = axis_bounds(1);
    let zs = axis_bounds(2);

    let mut tiles = Vec::with_capacity(xs.len() * ys.len() * zs.len());
    for &(x0, x1) in &xs {
        for &(y0, y1) in &ys {
            for &(z0, z1) in &zs {
                tiles.push(Tile {
                    start: [x0, y0, z0],
                    stop: [x1, y1, z1],
                });
            }
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_128_cube_in_64_blocks() {
        let dims = [128, 128, 128];
        let tiles = partition(dims, [64, 64, 64]);
        assert_eq!(tiles.len(), 8);
        assert_eq!(tiles[0].start, [0, 0, 0]);
        assert_eq!(tiles[1].start, [0, 0, 64]);
        assert_eq!(tiles[7].start, [64, 64, 64]);

        // Inner tiles reach one voxel past their seam; outer ones are clipped.
        assert_eq!(tiles[0].overlapped(dims), [0..65, 0..65, 0..65]);
        assert_eq!(tiles[7].overlapped(dims), [64..128, 64..128, 64..128]);
    }

    #[test]
    fn test_adjacent_tiles_share_one_voxel_layer() {
        let dims = [128, 128, 128];
        let tiles = partition(dims, [64, 64, 64]);
        for a in &tiles {
            for b in &tiles {
                let differing: Vec<usize> = (0..3).filter(|&i| a.start[i] != b.start[i]).collect();
                if differing.len() != 1 {
                    continue;
                }
                let axis = differing[0];
                let ra = a.overlapped(dims)[axis].clone();
                let rb = b.overlapped(dims)[axis].clone();
                let shared = ra.end.min(rb.end).saturating_sub(ra.start.max(rb.start));
                assert_eq!(shared, 1, "tiles {:?} and {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_ragged_edges() {
        let tiles = partition([100, 10, 1], [64, 64, 64]);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].stop, [64, 10, 1]);
        assert_eq!(tiles[1].start, [64, 0, 0]);
        assert_eq!(tiles[1].stop, [100, 10, 1]);
        assert_eq!(tiles[0].overlapped([100, 10, 1]), [0..65, 0..10, 0..1]);
    }

    #[test]
    fn test_empty_volume_has_no_tiles() {
        assert!(partition([0, 64, 64], [64, 64, 64]).is_empty());
    }
}
