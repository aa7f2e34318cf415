// Test fixtures: a sparse body encoder and a reference surface extractor.

use crate::mesh::surface::SurfaceExtractor;
use crate::mesh::types::{vertex_key, IndexedSurface, Vertex};
use crate::volume::sparse::{ContentFlag, GridHeader, SUBBLOCK_BYTES, SUBBLOCK_SIZE};
use crate::volume::Volume;
use std::collections::HashMap;

/// Builds sparse bodies byte by byte, the inverse of `volume::sparse::decode`.
pub struct SparseBodyWriter {
    header: GridHeader,
    bytes: Vec<u8>,
}

impl SparseBodyWriter {
    pub fn new(header: GridHeader) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&header.gx.to_le_bytes());
        bytes.extend_from_slice(&header.gy.to_le_bytes());
        bytes.extend_from_slice(&header.gz.to_le_bytes());
        bytes.extend_from_slice(&header.label.to_le_bytes());
        Self { header, bytes }
    }

    fn push_block_header(&mut self, position: [i32; 3], flag: ContentFlag) {
        for c in position {
            self.bytes.extend_from_slice(&c.to_le_bytes());
        }
        self.bytes.push(flag as u8);
    }

    pub fn push_constant(&mut self, position: [i32; 3], flag: ContentFlag) {
        assert_ne!(flag, ContentFlag::Mixed, "mixed blocks need a mask");
        self.push_block_header(position, flag);
    }

    /// Writes `mask` (in decoded x, y, z order, full resolution) as a mixed
    /// block, choosing a flag per subblock.
    pub fn push_block(&mut self, position: [i32; 3], mask: &Volume) {
        let [gx, gy, gz] = self.header.grid();
        let work = mask.reversed_axes();
        assert_eq!(
            work.dims(),
            [gx * SUBBLOCK_SIZE, gy * SUBBLOCK_SIZE, gz * SUBBLOCK_SIZE],
            "mask does not match the body grid"
        );

        self.push_block_header(position, ContentFlag::Mixed);
        for s in 0..gx * gy * gz {
            let origin = [s / (gy * gz), (s / gz) % gy, s % gz].map(|i| i * SUBBLOCK_SIZE);
            let sub = work.slice(origin.map(|o| o..o + SUBBLOCK_SIZE));

            match sub.uniformity() {
                Some(0) => self.bytes.push(ContentFlag::BackgroundOnly as u8),
                Some(_) => self.bytes.push(ContentFlag::ForegroundOnly as u8),
                None => {
                    self.bytes.push(ContentFlag::Mixed as u8);
                    let mut packed = [0u8; SUBBLOCK_BYTES];
                    for (n, byte) in packed.iter_mut().enumerate() {
                        let (i, j) = (n / SUBBLOCK_SIZE, n % SUBBLOCK_SIZE);
                        for k in 0..SUBBLOCK_SIZE {
                            *byte |= (sub.get(i, j, k) & 1) << k;
                        }
                    }
                    self.bytes.extend_from_slice(&packed);
                }
            }
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Emits one quad per face between neighbouring voxels that differ.
///
/// Faces sit on the half-integer plane between the two voxels and are wound
/// so the normal points out of the foreground. Faces on the block border are
/// not closed, which mirrors how a real extractor sees only the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaceExtractor;

impl SurfaceExtractor for FaceExtractor {
    fn extract(&self, block: &Volume) -> IndexedSurface {
        let dims = block.dims();
        let mut quads: Vec<[Vertex; 4]> = Vec::new();

        for x in 0..dims[0] {
            for y in 0..dims[1] {
                for z in 0..dims[2] {
                    let p = [x, y, z];
                    for a in 0..3 {
                        let mut q = p;
                        q[a] += 1;
                        if q[a] >= dims[a] {
                            continue;
                        }
                        let here = block.get(p[0], p[1], p[2]);
                        let there = block.get(q[0], q[1], q[2]);
                        if here == there {
                            continue;
                        }

                        let (b, c) = ((a + 1) % 3, (a + 2) % 3);
                        let corner = |db: f32, dc: f32| {
                            let mut v = [0.0f32; 3];
                            v[a] = p[a] as f32 + 0.5;
                            v[b] = p[b] as f32 + db;
                            v[c] = p[c] as f32 + dc;
                            v
                        };
                        let mut quad = [
                            corner(-0.5, -0.5),
                            corner(0.5, -0.5),
                            corner(0.5, 0.5),
                            corner(-0.5, 0.5),
                        ];
                        if there != 0 {
                            quad.reverse();
                        }
                        quads.push(quad);
                    }
                }
            }
        }

        // Number vertices in coordinate order, like a lattice-indexed
        // extractor, so the same face gets the same rotation in any block.
        let mut vertices: Vec<Vertex> = quads.iter().flatten().copied().collect();
        vertices.sort_unstable_by(|u, v| {
            u.iter()
                .zip(v.iter())
                .map(|(a, b)| a.total_cmp(b))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        vertices.dedup_by_key(|v| vertex_key(v));
        let ids: HashMap<[u32; 3], u32> = vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (vertex_key(v), i as u32))
            .collect();

        let mut triangles = Vec::with_capacity(quads.len() * 2);
        for quad in &quads {
            let idx = quad.map(|v| ids[&vertex_key(&v)]);
            triangles.push([idx[0], idx[1], idx[2]]);
            triangles.push([idx[0], idx[2], idx[3]]);
        }

        IndexedSurface {
            vertices,
            triangles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_extractor_single_voxel() {
        let mut block = Volume::zeros([3, 3, 3]);
        block.set(1, 1, 1, 1);
        let surface = FaceExtractor.extract(&block);
        assert_eq!(surface.triangles.len(), 12);
        assert_eq!(surface.vertices.len(), 8);
    }

    #[test]
    fn test_face_extractor_uniform_block_is_empty() {
        assert!(FaceExtractor.extract(&Volume::filled([4, 4, 4], 1)).is_empty());
    }
}
