use super::partition::{partition, Tile};
use super::transport::{TransportError, WorkerTransport};
use super::wire::{BlockRequest, TriangleResponse};
use crate::mesh::types::Triangle;
use crate::settings::Settings;
use crate::volume::Volume;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("worker pool is empty")]
    EmptyWorkerPool,

    #[error("block size {0:?} has a zero dimension")]
    ZeroBlockSize([usize; 3]),

    #[error("block preparation did not complete: {0}")]
    Interrupted(String),
}

/// Why a block was never sent to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// At least one dimension is a single voxel
    Degenerate,
    Background,
    Foreground,
}

/// What became of one dispatch block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Skipped(SkipReason),
    /// The worker answered with no geometry
    NoSurface,
    Surface(Vec<Triangle>),
    /// The call failed; the block contributes nothing
    Failed(String),
}

impl BlockOutcome {
    pub fn triangles(&self) -> &[Triangle] {
        match self {
            BlockOutcome::Surface(triangles) => triangles,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockResult {
    pub tile: Tile,
    /// Worker assigned by round robin; `None` for skipped blocks
    pub worker: Option<String>,
    pub outcome: BlockOutcome,
}

/// Per-block results of one job, in partition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub blocks: Vec<BlockResult>,
}

impl DispatchReport {
    /// Blocks that were actually sent to a worker.
    pub fn dispatched(&self) -> usize {
        self.blocks.iter().filter(|b| b.worker.is_some()).count()
    }

    pub fn skipped(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b.outcome, BlockOutcome::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b.outcome, BlockOutcome::Failed(_)))
            .count()
    }

    /// True when blocks were sent and none of them came back.
    pub fn all_failed(&self) -> bool {
        let dispatched = self.dispatched();
        dispatched > 0 && self.failed() == dispatched
    }

    /// Triangle sets of the blocks that produced geometry, in partition order.
    pub fn triangle_sets(&self) -> Vec<Vec<Triangle>> {
        self.blocks
            .iter()
            .filter_map(|b| match &b.outcome {
                BlockOutcome::Surface(triangles) => Some(triangles.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn into_triangle_sets(self) -> Vec<Vec<Triangle>> {
        self.blocks
            .into_iter()
            .filter_map(|b| match b.outcome {
                BlockOutcome::Surface(triangles) => Some(triangles),
                _ => None,
            })
            .collect()
    }
}

/// A tile after slicing: either settled locally or waiting to be sent.
enum Prepared {
    Skip(SkipReason),
    Send { worker: String, request: BlockRequest },
}

enum Slot {
    Settled(SkipReason),
    Pending {
        worker: String,
        handle: JoinHandle<Result<TriangleResponse, TransportError>>,
    },
}

/// Slices and classifies every tile, assigning workers round robin.
fn prepare(volume: &Volume, tiles: &[Tile], workers: &[String]) -> Vec<Prepared> {
    let dims = volume.dims();
    tiles
        .par_iter()
        .enumerate()
        .map(|(i, tile)| {
            let block = volume.slice(tile.overlapped(dims));
            match classify(&block) {
                Some(reason) => Prepared::Skip(reason),
                None => Prepared::Send {
                    worker: workers[i % workers.len()].clone(),
                    request: BlockRequest::from_volume(&block, tile.offset()),
                },
            }
        })
        .collect()
}

fn classify(block: &Volume) -> Option<SkipReason> {
    if block.dims().contains(&1) {
        return Some(SkipReason::Degenerate);
    }
    match block.uniformity() {
        Some(0) => Some(SkipReason::Background),
        Some(_) => Some(SkipReason::Foreground),
        None => None,
    }
}

/// Fans a volume out to worker nodes block by block.
///
/// The worker list and block size are fixed at construction. Block `i` of
/// the partition goes to `workers[i % workers.len()]`.
pub struct DispatchCoordinator<T> {
    workers: Vec<String>,
    block_size: [usize; 3],
    transport: Arc<T>,
}

impl<T: WorkerTransport> DispatchCoordinator<T> {
    pub fn new(
        workers: Vec<String>,
        block_size: [usize; 3],
        transport: T,
    ) -> Result<Self, DispatchError> {
        if workers.is_empty() {
            return Err(DispatchError::EmptyWorkerPool);
        }
        if block_size.contains(&0) {
            return Err(DispatchError::ZeroBlockSize(block_size));
        }
        Ok(Self {
            workers,
            block_size,
            transport: Arc::new(transport),
        })
    }

    pub fn from_settings(settings: &Settings, transport: T) -> Result<Self, DispatchError> {
        Self::new(settings.worker_urls(), settings.block_size, transport)
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    pub fn block_size(&self) -> [usize; 3] {
        self.block_size
    }

    /// Meshes every block of `volume` on the worker pool.
    ///
    /// All requests run concurrently and this returns only after each one
    /// has finished. Failed blocks are logged and reported, never fatal.
    pub async fn dispatch(
        &self,
        volume: impl Into<Arc<Volume>>,
    ) -> Result<DispatchReport, DispatchError> {
        let volume: Arc<Volume> = volume.into();
        let dims = volume.dims();
        let tiles = partition(dims, self.block_size);
        info!(
            "partitioned ({}, {}, {}) into {} blocks of {:?}",
            dims[0],
            dims[1],
            dims[2],
            tiles.len(),
            self.block_size
        );

        // Slice and classify every tile up front, off the async workers
        let prepared = {
            let tiles = tiles.clone();
            let workers = self.workers.clone();
            tokio::task::spawn_blocking(move || prepare(&volume, &tiles, &workers))
                .await
                .map_err(|e| DispatchError::Interrupted(e.to_string()))?
        };

        // One task per block that needs a worker; each owns its own slot
        let mut slots = Vec::with_capacity(prepared.len());
        for item in prepared {
            let slot = match item {
                Prepared::Skip(reason) => Slot::Settled(reason),
                Prepared::Send { worker, request } => {
                    let transport = Arc::clone(&self.transport);
                    let url = worker.clone();
                    let handle = tokio::spawn(async move { transport.send(&url, request).await });
                    Slot::Pending { worker, handle }
                }
            };
            slots.push(slot);
        }
        let in_flight = slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Pending { .. }))
            .count();
        info!(
            "submitted {} blocks to {} workers, {} skipped",
            in_flight,
            self.workers.len(),
            slots.len() - in_flight
        );

        // Barrier: every pending call is awaited before anything is returned
        let mut blocks = Vec::with_capacity(slots.len());
        for (tile, slot) in tiles.into_iter().zip(slots) {
            let result = match slot {
                Slot::Settled(reason) => BlockResult {
                    tile,
                    worker: None,
                    outcome: BlockOutcome::Skipped(reason),
                },
                Slot::Pending { worker, handle } => {
                    let reply = handle.await.unwrap_or_else(|e| {
                        Err(TransportError::Aborted {
                            url: worker.clone(),
                            reason: e.to_string(),
                        })
                    });
                    BlockResult {
                        tile,
                        outcome: settle(&tile, reply),
                        worker: Some(worker),
                    }
                }
            };
            blocks.push(result);
        }

        let report = DispatchReport { blocks };
        if report.failed() > 0 {
            warn!(
                "{} of {} dispatched blocks failed",
                report.failed(),
                report.dispatched()
            );
        }
        Ok(report)
    }
}

fn settle(tile: &Tile, result: Result<TriangleResponse, TransportError>) -> BlockOutcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            error!("{}", e);
            return BlockOutcome::Failed(e.to_string());
        }
    };

    match response.into_triangles() {
        Ok(Some(triangles)) => {
            debug!("block at {:?}: {} triangles", tile.offset(), triangles.len());
            BlockOutcome::Surface(triangles)
        }
        Ok(None) => BlockOutcome::NoSurface,
        Err(e) => {
            error!("undecodable reply for block at {:?}: {}", tile.offset(), e);
            BlockOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::transport::LocalTransport;
    use crate::mesh::merge_triangle_sets;
    use crate::testing::FaceExtractor;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every call and fails those addressed to `failing` workers.
    struct RecordingTransport {
        inner: LocalTransport<FaceExtractor>,
        failing: HashSet<String>,
        calls: Mutex<Vec<(String, [usize; 3])>>,
    }

    impl RecordingTransport {
        fn new(failing: &[&str]) -> Self {
            Self {
                inner: LocalTransport::new(FaceExtractor),
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl WorkerTransport for RecordingTransport {
        async fn send(
            &self,
            url: &str,
            request: BlockRequest,
        ) -> Result<TriangleResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), request.offset));
            if self.failing.contains(url) {
                return Err(TransportError::Status {
                    url: url.to_string(),
                    status: 500,
                });
            }
            self.inner.send(url, request).await
        }
    }

    /// Answers every block with a shape whose byte count overflows.
    struct OversizedReply;

    impl WorkerTransport for OversizedReply {
        async fn send(
            &self,
            _url: &str,
            _request: BlockRequest,
        ) -> Result<TriangleResponse, TransportError> {
            Ok(TriangleResponse {
                dtype: "float32".to_string(),
                shape: "3000000000000000000|3|3".to_string(),
                bytes: String::new(),
            })
        }
    }

    fn workers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn coordinator(
        names: &[&str],
        failing: &[&str],
        block: usize,
    ) -> DispatchCoordinator<RecordingTransport> {
        DispatchCoordinator::new(workers(names), [block; 3], RecordingTransport::new(failing))
            .unwrap()
    }

    #[test]
    fn test_rejects_empty_pool_and_zero_block() {
        let t = RecordingTransport::new(&[]);
        assert!(matches!(
            DispatchCoordinator::new(Vec::new(), [64; 3], t),
            Err(DispatchError::EmptyWorkerPool)
        ));
        let t = RecordingTransport::new(&[]);
        assert!(matches!(
            DispatchCoordinator::new(workers(&["a"]), [64, 0, 64], t),
            Err(DispatchError::ZeroBlockSize(_))
        ));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&Volume::zeros([4, 1, 4])), Some(SkipReason::Degenerate));
        assert_eq!(classify(&Volume::zeros([4, 4, 4])), Some(SkipReason::Background));
        assert_eq!(classify(&Volume::filled([4, 4, 4], 1)), Some(SkipReason::Foreground));
        let mut mixed = Volume::zeros([4, 4, 4]);
        mixed.set(0, 0, 0, 1);
        assert_eq!(classify(&mixed), None);
    }

    #[test]
    fn test_prepare_runs_without_a_runtime() {
        // Tile 0 is mixed, tile 1 all background, tile 2 mixed
        let mut volume = Volume::zeros([12, 4, 4]);
        volume.set(1, 1, 1, 1);
        volume.set(9, 1, 1, 1);
        let tiles = partition(volume.dims(), [4, 4, 4]);
        let prepared = prepare(&volume, &tiles, &workers(&["a", "b"]));

        assert_eq!(prepared.len(), 3);
        assert!(matches!(&prepared[0], Prepared::Send { worker, .. } if worker == "a"));
        assert!(matches!(prepared[1], Prepared::Skip(SkipReason::Background)));
        match &prepared[2] {
            Prepared::Send { worker, request } => {
                assert_eq!(worker, "a");
                assert_eq!(request.offset, [8, 0, 0]);
                assert_eq!(request.shape, [4, 4, 4]);
            }
            Prepared::Skip(reason) => panic!("tile 2 skipped as {:?}", reason),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cube_inside_one_tile_dispatches_once() {
        let mut volume = Volume::zeros([128, 128, 128]);
        volume.fill_region([10, 10, 10], [10, 10, 10], 1);

        let coord = coordinator(&["w0", "w1", "w2"], &[], 64);
        let report = coord.dispatch(volume).await.unwrap();

        assert_eq!(report.blocks.len(), 8);
        assert_eq!(report.dispatched(), 1);
        assert_eq!(report.skipped(), 7);
        assert_eq!(report.blocks[0].worker.as_deref(), Some("w0"));
        // 10x10x10 cube: 600 unit faces
        assert_eq!(report.blocks[0].outcome.triangles().len(), 1200);
        for block in &report.blocks[1..] {
            assert_eq!(block.outcome, BlockOutcome::Skipped(SkipReason::Background));
        }

        let calls = coord.transport.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("w0".to_string(), [0, 0, 0])]);
    }

    #[tokio::test]
    async fn test_round_robin_assignment() {
        // Checkerboard so every tile is mixed
        let mut volume = Volume::zeros([8, 8, 8]);
        for x in 0..8 {
            for y in 0..8 {
                for z in 0..8 {
                    volume.set(x, y, z, ((x + y + z) % 2) as u8);
                }
            }
        }

        let coord = coordinator(&["a", "b", "c"], &[], 4);
        let report = coord.dispatch(volume).await.unwrap();
        let assigned: Vec<_> = report
            .blocks
            .iter()
            .map(|b| b.worker.clone().unwrap())
            .collect();
        assert_eq!(assigned, workers(&["a", "b", "c", "a", "b", "c", "a", "b"]));
    }

    #[tokio::test]
    async fn test_partial_failure_drops_only_failed_blocks() {
        // Two separate cubes in different tiles
        let mut volume = Volume::zeros([16, 16, 16]);
        volume.fill_region([1, 1, 1], [3, 3, 3], 1);
        volume.fill_region([9, 9, 9], [3, 3, 3], 1);

        let volume = Arc::new(volume);
        let healthy = coordinator(&["good"], &[], 8)
            .dispatch(Arc::clone(&volume))
            .await
            .unwrap();
        assert_eq!(healthy.dispatched(), 2);
        assert_eq!(healthy.failed(), 0);

        // Tile 0 -> "good", tile 7 -> "bad" with round robin over two workers
        let partial = coordinator(&["good", "bad"], &["bad"], 8)
            .dispatch(volume)
            .await
            .unwrap();

        assert_eq!(partial.dispatched(), 2);
        assert_eq!(partial.failed(), 1);
        assert!(!partial.all_failed());
        assert!(matches!(partial.blocks[7].outcome, BlockOutcome::Failed(_)));

        let surviving: Vec<Vec<Triangle>> = healthy
            .blocks
            .iter()
            .zip(&partial.blocks)
            .filter(|(_, p)| !matches!(p.outcome, BlockOutcome::Failed(_)))
            .map(|(h, _)| h.outcome.triangles().to_vec())
            .collect();
        assert_eq!(
            merge_triangle_sets(partial.into_triangle_sets()),
            merge_triangle_sets(surviving)
        );
    }

    #[tokio::test]
    async fn test_all_failed_is_distinguishable() {
        let mut volume = Volume::zeros([8, 8, 8]);
        volume.fill_region([2, 2, 2], [2, 2, 2], 1);

        let report = coordinator(&["down"], &["down"], 8)
            .dispatch(volume)
            .await
            .unwrap();
        assert!(report.all_failed());
        assert!(merge_triangle_sets(report.into_triangle_sets()).is_empty());

        let empty = coordinator(&["down"], &["down"], 8)
            .dispatch(Volume::zeros([8, 8, 8]))
            .await
            .unwrap();
        assert!(!empty.all_failed());
        assert_eq!(empty.dispatched(), 0);
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_only_its_block() {
        let mut volume = Volume::zeros([8, 8, 16]);
        volume.fill_region([2, 2, 2], [2, 2, 2], 1);

        let coord = DispatchCoordinator::new(workers(&["w"]), [8; 3], OversizedReply).unwrap();
        let report = coord.dispatch(volume).await.unwrap();

        assert_eq!(report.blocks.len(), 2);
        assert!(matches!(report.blocks[0].outcome, BlockOutcome::Failed(_)));
        assert_eq!(report.blocks[1].outcome, BlockOutcome::Skipped(SkipReason::Background));
        assert!(report.all_failed());
    }

    #[tokio::test]
    async fn test_degenerate_tiles_are_skipped() {
        // The x extent leaves a one-voxel-thick last tile
        let mut volume = Volume::zeros([9, 8, 8]);
        volume.set(8, 3, 3, 1);
        volume.set(2, 3, 3, 1);

        let coord = coordinator(&["w"], &[], 8);
        let report = coord.dispatch(volume).await.unwrap();
        assert_eq!(report.blocks.len(), 2);
        assert!(report.blocks[0].worker.is_some());
        assert_eq!(report.blocks[1].outcome, BlockOutcome::Skipped(SkipReason::Degenerate));
        assert_eq!(coord.transport.calls.lock().unwrap().len(), 1);
    }
}
