//! Downloading: stream negotiation, transfer, naming and batch orchestration.

pub mod manifest;
pub mod naming;
pub mod negotiator;
pub mod orchestrator;
pub mod progress;
pub mod transfer;

pub use manifest::StreamDescriptor;
pub use negotiator::{Negotiated, negotiate, negotiate_video};
pub use orchestrator::{
    AlbumOutcome, AlbumResult, BatchReport, DownloadOptions, ItemKind, Orchestrator, Outcome,
    Provenance, ResumeScope, SkipReason, Status, Summary,
};
pub use progress::{ConsoleObserver, NoopObserver, ProgressEvent, ProgressObserver};
pub use transfer::{HttpTransfer, Transfer, TransferError};
