pub mod aggregate;
pub mod obj;
pub mod surface;
pub mod types;

// Re-export commonly used items
pub use aggregate::merge_triangle_sets;
pub use obj::{save_obj, to_obj_string, write_obj};
pub use surface::{canonicalize, expand_surface, mesh_block, respond, SurfaceError, SurfaceExtractor};
pub use types::{IndexedSurface, Mesh, Triangle, Vertex};
