//! Progress reporting for long-running merges.
//!
//! Every merge strategy reports through one callback shape: the callback
//! receives a [`Progress`] snapshot and returns `true` to continue or
//! `false` to cancel. Strategies report at different granularities, so
//! counters that do not apply to the running strategy are zero.

use std::io::Write;

/// A point-in-time snapshot of merge progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Completed fraction in `[0, 1]`.
    pub fraction: f64,
    /// 1-based index of the band just finished, 0 when not applicable.
    pub band: usize,
    /// Total number of output bands.
    pub bands: usize,
    /// 1-based index of the window just finished, 0 when not applicable.
    pub window: usize,
    /// Total number of windows per band, 0 when not applicable.
    pub windows: usize,
    /// Edge length of the block grid in pixels, 0 when not applicable.
    pub block_dim: usize,
}

/// Callback invoked with progress snapshots; returns `false` to cancel.
pub type ProgressCallback<'a> = Box<dyn FnMut(&Progress) -> bool + 'a>;

/// A progress callback that renders a single updating line onto `out`.
///
/// Never cancels. Write failures are ignored so that a closed pipe does
/// not abort a merge.
pub fn printer<W: Write>(mut out: W) -> impl FnMut(&Progress) -> bool {
    move |progress: &Progress| {
        let percent = progress.fraction * 100.0;
        if progress.band > 0 && progress.bands > 0 {
            let _ = write!(
                out,
                "\rMerging band {}/{} ({percent:3.0}%)",
                progress.band, progress.bands
            );
        } else {
            let _ = write!(out, "\rMerging ({percent:3.0}%)");
        }
        if progress.fraction >= 1.0 {
            let _ = writeln!(out);
        }
        let _ = out.flush();
        true
    }
}

/// [`printer`] wired to standard output.
pub fn console_printer() -> impl FnMut(&Progress) -> bool {
    printer(std::io::stdout())
}
