//! Library index: what has already been downloaded.
//!
//! [`LibraryStore`] owns the on-disk snapshot, [`resolver`] answers "do we
//! already have this?", and the album tracker (in `albums`) follows partial
//! album downloads across restarts.

mod albums;
pub mod legacy;
pub mod resolver;
pub mod state;
pub mod store;

pub use resolver::{Candidate, MatchMode, MatchTier, normalize};
pub use state::{
    AlbumRecord, AlbumStatus, Counts, LibraryState, QualityInfo, Sources, TrackRecord,
    VideoRecord,
};
pub use store::{
    BackfillOptions, DateBackfillReport, LibraryStore, MetadataBackfillReport, MissingReport,
    StorePaths, TrackUpdate, WipeReport,
};
