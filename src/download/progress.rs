//! Progress reporting for download batches.
//!
//! The orchestrator emits [`ProgressEvent`]s to a [`ProgressObserver`]; it
//! never prints anything itself.

use super::orchestrator::{AlbumOutcome, Outcome, Summary};

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    BatchStarted {
        total: usize,
    },
    /// Work on one requested item begins (`index` is 1-based)
    ItemStarted {
        index: usize,
        total: usize,
        id: String,
        title: String,
    },
    /// A stream was negotiated
    StreamSelected {
        id: String,
        quality: String,
        exact: bool,
    },
    ItemFinished(Outcome),
    AlbumStarted {
        album_id: String,
        title: String,
        remaining: usize,
        total: u32,
    },
    AlbumFinished(AlbumOutcome),
    BatchFinished(Summary),
}

/// Receives progress events. Implementations must be cheap; they run inline.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Prints one line per item to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleObserver {
    pub verbose: bool,
}

impl ProgressObserver for ConsoleObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted { total } => {
                println!("Processing {} items...", total);
            }
            ProgressEvent::ItemStarted {
                index,
                total,
                title,
                ..
            } => {
                if self.verbose {
                    println!("[{}/{}] {}", index, total, title);
                }
            }
            ProgressEvent::StreamSelected { quality, exact, .. } => {
                if self.verbose && !exact {
                    println!("  fell back to {}", quality);
                }
            }
            ProgressEvent::ItemFinished(outcome) => {
                println!("  {} {}", outcome.status.icon(), outcome.describe());
            }
            ProgressEvent::AlbumStarted {
                title,
                remaining,
                total,
                ..
            } => {
                println!("Album '{}': {} of {} tracks to download", title, remaining, total);
            }
            ProgressEvent::AlbumFinished(album) => {
                println!("Album '{}': {}", album.title, album.status);
            }
            ProgressEvent::BatchFinished(summary) => {
                println!("\n{}", summary);
            }
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use parking_lot::Mutex;

    use super::*;

    /// Keeps every event for later inspection
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().clone()
        }
    }

    impl ProgressObserver for RecordingObserver {
        fn on_event(&self, event: &ProgressEvent) {
            self.events.lock().push(event.clone());
        }
    }
}
