//! Core types for podkeep

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl PartialEq<i64> for $name {
            fn eq(&self, other: &i64) -> bool {
                self.0 == *other
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

record_id!(
    /// Unique identifier for a podcast subscription
    PodcastId
);

record_id!(
    /// Unique identifier for an episode
    EpisodeId
);

record_id!(
    /// Unique identifier for a download task
    DownloadId
);

/// Download task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Waiting for a drain pass
    Pending,
    /// Claimed by a drain pass and transferring
    Downloading,
    /// File is on disk
    Completed,
    /// Gave up after the configured number of attempts
    Failed,
    /// Removed by the user or by retention
    Deleted,
}

impl DownloadStatus {
    /// Convert integer status code to DownloadStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => DownloadStatus::Pending,
            1 => DownloadStatus::Downloading,
            2 => DownloadStatus::Completed,
            3 => DownloadStatus::Failed,
            4 => DownloadStatus::Deleted,
            _ => DownloadStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert DownloadStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadStatus::Pending => 0,
            DownloadStatus::Downloading => 1,
            DownloadStatus::Completed => 2,
            DownloadStatus::Failed => 3,
            DownloadStatus::Deleted => 4,
        }
    }

    /// Lowercase name, as used in logs and error details
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Deleted => "deleted",
        }
    }

    /// No automatic transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Deleted
        )
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer from the play-state oracle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    /// The media server has recorded at least one play
    Played,
    /// The file is indexed but has never been played
    Unplayed,
    /// Lookup failed or the file is not indexed yet
    Unknown,
}

/// Result of the most recent run of a job
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job has not run since registration
    #[default]
    Never,
    /// The last run returned Ok
    Success,
    /// The last run returned an error or panicked
    Failed {
        /// Error message
        error: String,
    },
}

/// Event emitted by the engine, discovery and scheduler
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Episode queued (or re-queued) for download
    Queued {
        /// Download ID
        id: DownloadId,
        /// Episode the task belongs to
        episode_id: EpisodeId,
    },

    /// Task claimed by a drain pass
    Started {
        /// Download ID
        id: DownloadId,
    },

    /// Transfer progress, a fraction in [0.0, 1.0]
    Progress {
        /// Download ID
        id: DownloadId,
        /// Fraction of the file written so far
        fraction: f32,
    },

    /// File written to disk
    Completed {
        /// Download ID
        id: DownloadId,
        /// Final file location
        path: PathBuf,
        /// Bytes written
        size_bytes: u64,
    },

    /// Attempt failed and the task went back to pending
    RetryScheduled {
        /// Download ID
        id: DownloadId,
        /// Attempts consumed so far
        retry_count: u32,
        /// Earliest time the next drain may pick it up
        next_attempt_at: DateTime<Utc>,
        /// Error message
        error: String,
    },

    /// Task reached terminal `failed`
    Failed {
        /// Download ID
        id: DownloadId,
        /// Error message
        error: String,
        /// Attempts consumed so far
        retry_count: u32,
    },

    /// Task marked deleted
    Removed {
        /// Download ID
        id: DownloadId,
        /// Whether the file was deleted from disk
        file_deleted: bool,
    },

    /// Discovery pass finished for a podcast
    EpisodesDiscovered {
        /// Podcast ID
        podcast_id: PodcastId,
        /// Newly inserted episodes
        new_episodes: usize,
    },

    /// A job action began
    JobStarted {
        /// Job id
        job_id: String,
    },

    /// A job action returned
    JobFinished {
        /// Job id
        job_id: String,
        /// Outcome of the run
        outcome: JobOutcome,
    },

    /// Shutdown started
    Shutdown,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_i32() {
        for status in [
            DownloadStatus::Pending,
            DownloadStatus::Downloading,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
            DownloadStatus::Deleted,
        ] {
            assert_eq!(DownloadStatus::from_i32(status.to_i32()), status);
        }
    }

    #[test]
    fn unknown_status_code_defaults_to_failed() {
        assert_eq!(DownloadStatus::from_i32(99), DownloadStatus::Failed);
    }

    #[test]
    fn terminal_states() {
        assert!(!DownloadStatus::Pending.is_terminal());
        assert!(!DownloadStatus::Downloading.is_terminal());
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Deleted.is_terminal());
    }

    #[test]
    fn ids_parse_and_display() {
        let id: DownloadId = "42".parse().unwrap();
        assert_eq!(id, 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(i64::from(PodcastId(7)), 7);
        assert!("x".parse::<EpisodeId>().is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::Progress {
            id: DownloadId(3),
            fraction: 0.5,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "progress");
        assert_eq!(json["id"], 3);
        assert_eq!(json["fraction"], 0.5);
    }

    #[test]
    fn job_outcome_serializes_with_state_tag() {
        let json = serde_json::to_value(JobOutcome::Failed {
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(JobOutcome::default(), JobOutcome::Never);
    }
}
