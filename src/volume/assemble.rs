use super::sparse::BlockRecord;
use super::{voxel_count, Volume, MAX_VOXELS};
use log::info;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("no blocks to assemble")]
    NoBlocks,

    #[error("block at {position:?} has shape {found:?}, expected {expected:?}")]
    NonUniformShape {
        position: [i32; 3],
        expected: [usize; 3],
        found: [usize; 3],
    },

    #[error("block coordinate {coordinate} on axis {axis} is not a multiple of spacing {spacing} from origin {origin}")]
    Misaligned {
        axis: usize,
        coordinate: i32,
        origin: i32,
        spacing: i64,
    },

    #[error("assembled volume would exceed {max} voxels", max = MAX_VOXELS)]
    TooLarge,
}

/// Placement of block coordinates on one axis.
#[derive(Debug, Clone, Copy)]
struct AxisLayout {
    origin: i32,
    /// Coordinate distance between adjacent blocks; `None` when every block
    /// shares a single coordinate on this axis.
    spacing: Option<i64>,
    cells: usize,
    extent: usize,
}

impl AxisLayout {
    fn infer(values: &BTreeSet<i32>, cells: usize) -> Result<Self, AssembleError> {
        let mut iter = values.iter().copied();
        let origin = iter.next().ok_or(AssembleError::NoBlocks)?;
        let spacing = iter.next().map(|second| i64::from(second) - i64::from(origin));
        let max = values.iter().next_back().copied().unwrap_or(origin);
        let span = match spacing {
            Some(spacing) => ((i64::from(max) - i64::from(origin)) / spacing) as usize,
            None => 0,
        };
        let extent = span
            .checked_add(1)
            .and_then(|blocks| blocks.checked_mul(cells))
            .ok_or(AssembleError::TooLarge)?;

        Ok(Self {
            origin,
            spacing,
            cells,
            extent,
        })
    }

    fn offset(&self, axis: usize, coordinate: i32) -> Result<usize, AssembleError> {
        let delta = i64::from(coordinate) - i64::from(self.origin);
        let Some(spacing) = self.spacing else {
            return Ok(0);
        };
        if delta % spacing != 0 {
            return Err(AssembleError::Misaligned {
                axis,
                coordinate,
                origin: self.origin,
                spacing,
            });
        }
        Ok((delta / spacing) as usize * self.cells)
    }
}

/// Stitches decoded blocks into one dense volume.
///
/// The smallest coordinate on each axis is the origin and the gap between the
/// two smallest distinct coordinates is the block spacing, so one spacing step
/// advances the destination by one block shape. Blocks must share a shape.
/// An axis on which every block has the same coordinate is one block deep.
pub fn assemble(blocks: &[BlockRecord]) -> Result<Volume, AssembleError> {
    let first = blocks.first().ok_or(AssembleError::NoBlocks)?;
    let shape = first.mask.dims();

    let mut coords: [BTreeSet<i32>; 3] = Default::default();
    for block in blocks {
        if block.mask.dims() != shape {
            return Err(AssembleError::NonUniformShape {
                position: block.position(),
                expected: shape,
                found: block.mask.dims(),
            });
        }
        for (axis, value) in block.position().into_iter().enumerate() {
            coords[axis].insert(value);
        }
    }

    let mut layout = Vec::with_capacity(3);
    for axis in 0..3 {
        layout.push(AxisLayout::infer(&coords[axis], shape[axis])?);
    }

    let dims = [layout[0].extent, layout[1].extent, layout[2].extent];
    if !voxel_count(dims).is_some_and(|n| n <= MAX_VOXELS) {
        return Err(AssembleError::TooLarge);
    }
    let mut volume = Volume::zeros(dims);
    for block in blocks {
        let position = block.position();
        let origin = [
            layout[0].offset(0, position[0])?,
            layout[1].offset(1, position[1])?,
            layout[2].offset(2, position[2])?,
        ];
        volume.write_region(origin, &block.mask);
    }

    info!(
        "assembled {} blocks into array shape ({}, {}, {})",
        blocks.len(),
        dims[0],
        dims[1],
        dims[2]
    );
    Ok(volume)
}
