// End-to-end meshing job: input volume -> blocks on workers -> one mesh.

use crate::dispatch::{DispatchCoordinator, DispatchReport, WorkerTransport};
use crate::error::Result;
use crate::mesh::{merge_triangle_sets, Mesh};
use crate::settings::Settings;
use crate::volume::{assemble, decode, decode_file, BlockRecord, Granularity, Volume};
use log::{info, warn};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// How a job ended. An empty mesh is only ambiguous without this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Every dispatched block came back (possibly with no surface)
    Complete,
    /// Some blocks were lost; the mesh has holes where they were
    CompleteWithFailures { failed: usize, dispatched: usize },
    /// Blocks were sent and none came back
    AllBlocksFailed { dispatched: usize },
}

impl JobStatus {
    pub fn from_report(report: &DispatchReport) -> Self {
        let dispatched = report.dispatched();
        let failed = report.failed();
        if report.all_failed() {
            JobStatus::AllBlocksFailed { dispatched }
        } else if failed > 0 {
            JobStatus::CompleteWithFailures { failed, dispatched }
        } else {
            JobStatus::Complete
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, JobStatus::Complete)
    }
}

#[derive(Debug, Clone)]
pub struct JobOutput {
    pub mesh: Mesh,
    pub status: JobStatus,
    pub report: DispatchReport,
}

pub struct MeshJob<T> {
    coordinator: DispatchCoordinator<T>,
    granularity: Granularity,
}

impl<T: WorkerTransport> MeshJob<T> {
    pub fn new(settings: &Settings, transport: T) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            coordinator: DispatchCoordinator::from_settings(settings, transport)?,
            granularity: settings.granularity,
        })
    }

    pub fn coordinator(&self) -> &DispatchCoordinator<T> {
        &self.coordinator
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Meshes a dense volume. Lost blocks show up in `status`, not as errors.
    pub async fn mesh_volume(&self, volume: impl Into<Arc<Volume>>) -> Result<JobOutput> {
        let report = self.coordinator.dispatch(volume).await?;
        let status = JobStatus::from_report(&report);
        match status {
            JobStatus::Complete => {}
            JobStatus::CompleteWithFailures { failed, dispatched } => {
                warn!("{} of {} blocks failed; mesh is partial", failed, dispatched)
            }
            JobStatus::AllBlocksFailed { dispatched } => {
                warn!("all {} dispatched blocks failed; mesh is empty", dispatched)
            }
        }

        let mesh = merge_triangle_sets(report.triangle_sets());
        info!(
            "job finished: {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        );
        Ok(JobOutput {
            mesh,
            status,
            report,
        })
    }

    /// Stitches decoded blocks into one volume and meshes it.
    pub async fn mesh_blocks(&self, blocks: &[BlockRecord]) -> Result<JobOutput> {
        let volume = assemble(blocks)?;
        self.mesh_volume(volume).await
    }

    /// Decodes a sparse body at the job's granularity and meshes it.
    pub async fn mesh_sparse<R: Read>(&self, reader: R) -> Result<JobOutput> {
        let (header, blocks) = decode(reader, self.granularity)?;
        info!("meshing label {} from {} blocks", header.label, blocks.len());
        self.mesh_blocks(&blocks).await
    }

    pub async fn mesh_sparse_file(&self, path: &Path) -> Result<JobOutput> {
        let (header, blocks) = decode_file(path, self.granularity)?;
        info!(
            "meshing label {} from {} blocks in {}",
            header.label,
            blocks.len(),
            path.display()
        );
        self.mesh_blocks(&blocks).await
    }
}
