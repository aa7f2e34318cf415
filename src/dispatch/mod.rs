pub mod coordinator;
pub mod partition;
pub mod transport;
pub mod wire;

// Re-export commonly used items
pub use coordinator::{
    BlockOutcome, BlockResult, DispatchCoordinator, DispatchError, DispatchReport, SkipReason,
};
pub use partition::{partition, Tile};
pub use transport::{HttpTransport, LocalTransport, TransportError, WorkerTransport};
pub use wire::{BlockRequest, TriangleResponse, WireError};
