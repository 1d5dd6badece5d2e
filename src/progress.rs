//! Progress-callback trait for snapshot events.
//!
//! Inject an [`Arc<dyn SnapshotProgressCallback>`] via
//! [`crate::convert::DocumentRendererBuilder::progress_callback`] to receive
//! events as the pipeline renders, settles and inlines images.
//!
//! The trait is `Send + Sync` because image tasks report from whichever
//! worker thread finished them.
//!
//! # Example
//!
//! ```rust
//! use htmlsnap::SnapshotProgressCallback;
//! use std::sync::{Arc, Mutex};
//!
//! struct LastPercent(Mutex<f64>);
//!
//! impl SnapshotProgressCallback for LastPercent {
//!     fn on_image_progress(&self, percent: f64) {
//!         *self.0.lock().unwrap() = percent;
//!     }
//! }
//!
//! let cb = Arc::new(LastPercent(Mutex::new(0.0)));
//! cb.on_image_progress(50.0);
//! assert_eq!(*cb.0.lock().unwrap(), 50.0);
//! ```

use crate::output::SnapshotStats;
use std::sync::Arc;

/// Called by the pipeline as it works through one snapshot.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait SnapshotProgressCallback: Send + Sync {
    /// Called once when the main document is handed to the renderer.
    fn on_render_start(&self, source_path: &str) {
        let _ = source_path;
    }

    /// Called when the main document has settled.
    ///
    /// # Arguments
    /// * `waited_ms` — time spent waiting for post-processors
    fn on_settled(&self, waited_ms: u64) {
        let _ = waited_ms;
    }

    /// Called with the overall image-inlining percentage.
    ///
    /// Fires with `0.0` before the first task, then after every task. A
    /// document without images reports `100.0` exactly once.
    fn on_image_progress(&self, percent: f64) {
        let _ = percent;
    }

    /// Called when one image task settles.
    ///
    /// # Arguments
    /// * `source`  — the source attribute the task started from
    /// * `inlined` — false when the original source was kept
    fn on_image_complete(&self, source: &str, inlined: bool) {
        let _ = (source, inlined);
    }

    /// Called once after the finished tree is ready.
    fn on_render_complete(&self, stats: &SnapshotStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl SnapshotProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::convert::DocumentRenderer`].
pub type ProgressCallback = Arc<dyn SnapshotProgressCallback>;
