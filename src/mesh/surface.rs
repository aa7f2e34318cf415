// Worker-side wrapper around the isosurface extractor: block in, canonical
// triangle-of-vertices array out.

use crate::dispatch::wire::{BlockRequest, TriangleResponse, WireError};
use crate::mesh::types::{sort_unique, IndexedSurface, Triangle};
use crate::volume::Volume;
use log::debug;

/// Black-box surface extraction over a binary block.
///
/// Implementations return vertices in block-local voxel coordinates and
/// triangles as indices into that vertex list, for the 0/1 boundary.
/// Must be Sync so one extractor can serve concurrent requests.
pub trait SurfaceExtractor: Send + Sync {
    fn extract(&self, block: &Volume) -> IndexedSurface;
}

impl<F> SurfaceExtractor for F
where
    F: Fn(&Volume) -> IndexedSurface + Send + Sync,
{
    fn extract(&self, block: &Volume) -> IndexedSurface {
        self(block)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("triangle {triangle} references vertex {index} of {count}")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        count: usize,
    },
}

/// Rotates a triangle so its smallest vertex index comes first, keeping the
/// cyclic order (and therefore the winding).
pub fn canonicalize(triangle: [u32; 3]) -> [u32; 3] {
    let mut first = 0;
    for i in 1..3 {
        if triangle[i] < triangle[first] {
            first = i;
        }
    }
    [
        triangle[first],
        triangle[(first + 1) % 3],
        triangle[(first + 2) % 3],
    ]
}

/// Translates vertices by `offset`, canonicalizes every triangle and expands
/// indices into explicit coordinates. Exact duplicates are removed.
pub fn expand_surface(
    surface: &IndexedSurface,
    offset: [usize; 3],
) -> Result<Vec<Triangle>, SurfaceError> {
    let shift = offset.map(|o| o as f32);
    let translated: Vec<[f32; 3]> = surface
        .vertices
        .iter()
        .map(|v| [v[0] + shift[0], v[1] + shift[1], v[2] + shift[2]])
        .collect();

    let mut triangles = Vec::with_capacity(surface.triangles.len());
    for (t, &indices) in surface.triangles.iter().enumerate() {
        let canonical = canonicalize(indices);
        let mut triangle = [[0.0f32; 3]; 3];
        for (slot, &index) in triangle.iter_mut().zip(canonical.iter()) {
            *slot = *translated
                .get(index as usize)
                .ok_or(SurfaceError::IndexOutOfRange {
                    triangle: t,
                    index,
                    count: translated.len(),
                })?;
        }
        triangles.push(triangle);
    }

    sort_unique(&mut triangles);
    Ok(triangles)
}

/// Meshes one block and returns its triangles in global coordinates.
pub fn mesh_block<E: SurfaceExtractor + ?Sized>(
    extractor: &E,
    block: &Volume,
    offset: [usize; 3],
) -> Result<Vec<Triangle>, SurfaceError> {
    let surface = extractor.extract(block);
    if surface.is_empty() {
        return Ok(Vec::new());
    }
    expand_surface(&surface, offset)
}

/// Handles a form-encoded block request the way a worker node does.
pub fn respond<E: SurfaceExtractor + ?Sized>(
    form_body: &[u8],
    extractor: &E,
) -> Result<TriangleResponse, WireError> {
    let request = BlockRequest::from_form_body(form_body)?;
    let block = request.to_volume()?;
    let triangles = mesh_block(extractor, &block, request.offset)
        .map_err(|e| WireError::Extraction(e.to_string()))?;

    debug!(
        "meshed block at {:?} with shape {:?}: {} triangles",
        request.offset,
        request.shape,
        triangles.len()
    );
    Ok(TriangleResponse::from_triangles(&triangles))
}
