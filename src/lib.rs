pub mod dispatch;
pub mod error;
pub mod mesh;
pub mod pipeline;
pub mod settings;
pub mod volume;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use mesh::{Mesh, Triangle};
pub use pipeline::{JobOutput, JobStatus, MeshJob};
pub use settings::Settings;
pub use volume::Volume;
