use crate::mesh::types::{compare_triangles, vertex_key, Mesh, Triangle};
use log::info;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Merges independently meshed blocks into one indexed mesh.
///
/// Empty sets are dropped, the rest concatenated, and exact duplicate
/// triangles (the doubled faces along overlapping seams) removed after a
/// lexicographic sort. Vertex ids are 1-based and assigned in the order
/// vertices are first met while walking the surviving triangles.
pub fn merge_triangle_sets<I>(sets: I) -> Mesh
where
    I: IntoIterator<Item = Vec<Triangle>>,
{
    let mut triangles: Vec<Triangle> = sets
        .into_iter()
        .filter(|set| !set.is_empty())
        .flatten()
        .collect();

    let collected = triangles.len();
    triangles.par_sort_unstable_by(compare_triangles);
    triangles.dedup_by(|a, b| compare_triangles(a, b) == Ordering::Equal);

    let mut lookup: HashMap<[u32; 3], u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut faces = Vec::with_capacity(triangles.len());

    for triangle in &triangles {
        let mut face = [0u32; 3];
        for (slot, vertex) in face.iter_mut().zip(triangle.iter()) {
            *slot = *lookup.entry(vertex_key(vertex)).or_insert_with(|| {
                vertices.push(*vertex);
                vertices.len() as u32
            });
        }
        faces.push(face);
    }

    info!(
        "merged {} triangles into {} faces over {} vertices",
        collected,
        faces.len(),
        vertices.len()
    );

    Mesh { vertices, faces }
}
