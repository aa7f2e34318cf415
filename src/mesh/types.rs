use std::cmp::Ordering;

pub type Vertex = [f32; 3];

/// A triangle stored as three explicit coordinate triples.
pub type Triangle = [Vertex; 3];

/// Output of a surface extractor in block-local coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedSurface {
    pub vertices: Vec<Vertex>,
    /// Indices into `vertices`, three per triangle
    pub triangles: Vec<[u32; 3]>,
}

impl IndexedSurface {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Final indexed mesh. Face indices are 1-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Resolves face `i` back to its coordinates.
    pub fn triangle(&self, i: usize) -> Triangle {
        self.faces[i].map(|id| self.vertices[id as usize - 1])
    }
}

/// Bit pattern of a vertex; equal keys mean byte-identical coordinates.
#[inline]
pub fn vertex_key(v: &Vertex) -> [u32; 3] {
    v.map(f32::to_bits)
}

/// Lexicographic total order over the nine coordinates of a triangle.
pub fn compare_triangles(a: &Triangle, b: &Triangle) -> Ordering {
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Sorts triangles and drops exact duplicates (same coordinates, same vertex
/// order).
pub fn sort_unique(triangles: &mut Vec<Triangle>) {
    triangles.sort_unstable_by(compare_triangles);
    triangles.dedup_by(|a, b| compare_triangles(a, b) == Ordering::Equal);
}
