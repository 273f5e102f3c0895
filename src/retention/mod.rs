//! Retention: which completed downloads to delete, and the pass that deletes them.
//!
//! The `N` most recently published completed downloads of a podcast are always
//! kept. Anything older is deleted, unless a play-state oracle is configured,
//! in which case only episodes the oracle reports as played are deleted.
//!
//! - [`evaluate`] - The policy itself; the only I/O is the injected oracle
//! - [`cleanup`] - Applies a plan through the download engine
//! - [`oracle`] - The play-state oracle seam and its Plex implementation

pub mod cleanup;
pub mod oracle;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use cleanup::{CleanupSummary, Retention};
pub use oracle::{PlayStateOracle, PlexOracle};

use crate::db::RetentionCandidate;
use crate::types::PlayState;
use serde::Serialize;
use std::path::Path;

/// Why a completed download is kept or deleted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Within the `N` most recent episodes
    KeepRecent,
    /// The oracle says it has not been played
    KeepUnplayed,
    /// The oracle could not say
    KeepUnknown,
    /// Beyond the retention count and not protected
    Delete,
}

impl Verdict {
    /// Whether the download should be removed
    pub fn is_delete(&self) -> bool {
        matches!(self, Verdict::Delete)
    }
}

/// Decide one download's fate from its rank (0 = newest)
///
/// `state` is `None` when no oracle is configured.
///
/// ```
/// use podkeep::retention::{decide, Verdict};
/// use podkeep::types::PlayState;
///
/// assert_eq!(decide(0, 2, Some(PlayState::Played)), Verdict::KeepRecent);
/// assert_eq!(decide(2, 2, None), Verdict::Delete);
/// assert_eq!(decide(2, 2, Some(PlayState::Unknown)), Verdict::KeepUnknown);
/// ```
pub fn decide(rank: usize, keep: usize, state: Option<PlayState>) -> Verdict {
    if rank < keep {
        return Verdict::KeepRecent;
    }
    match state {
        None | Some(PlayState::Played) => Verdict::Delete,
        Some(PlayState::Unplayed) => Verdict::KeepUnplayed,
        Some(PlayState::Unknown) => Verdict::KeepUnknown,
    }
}

/// Verdicts for one podcast's completed downloads
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetentionPlan {
    /// Every candidate with its verdict, newest first
    pub decisions: Vec<(RetentionCandidate, Verdict)>,
}

impl RetentionPlan {
    /// Candidates to delete, newest first
    pub fn to_delete(&self) -> impl Iterator<Item = &RetentionCandidate> {
        self.decisions
            .iter()
            .filter(|(_, verdict)| verdict.is_delete())
            .map(|(candidate, _)| candidate)
    }

    /// Number of candidates kept with the given verdict
    pub fn count(&self, verdict: Verdict) -> usize {
        self.decisions.iter().filter(|(_, v)| *v == verdict).count()
    }
}

/// Evaluate retention for one podcast
///
/// `candidates` must be ordered newest publication first. The oracle is only
/// asked about candidates beyond the retention count; a candidate without a
/// file path counts as `Unknown` when an oracle is configured.
pub async fn evaluate(
    candidates: Vec<RetentionCandidate>,
    keep: usize,
    oracle: Option<&dyn PlayStateOracle>,
) -> RetentionPlan {
    let mut decisions = Vec::with_capacity(candidates.len());

    for (rank, candidate) in candidates.into_iter().enumerate() {
        let state = match oracle {
            Some(oracle) if rank >= keep => Some(match candidate.file_path.as_deref() {
                Some(path) => oracle.play_state(Path::new(path)).await,
                None => PlayState::Unknown,
            }),
            _ => None,
        };

        let verdict = decide(rank, keep, state);
        tracing::debug!(
            download_id = candidate.id.0,
            title = %candidate.title,
            rank,
            ?verdict,
            "Retention verdict"
        );
        decisions.push((candidate, verdict));
    }

    RetentionPlan { decisions }
}
