use std::path::PathBuf;

use crate::record::{Category, PageId};

/// Reasons a categorization payload is refused before it becomes a pending record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("{side} category {category} is outside 0..={max}")]
    CategoryOutOfRange {
        side: &'static str,
        category: Category,
        max: u16,
    },
    #[error("{side} results report {inconclusive} inconclusive and {unknown} unknown out of {domains} domains")]
    DomainCountsInconsistent {
        side: &'static str,
        domains: u32,
        inconclusive: u32,
        unknown: u32,
    },
    #[error("mappings version must be at least 1")]
    MissingMappingsVersion,
    #[error("provider id is empty")]
    MissingProvider,
    #[error("{field} ads ({count}) exceed loaded ads ({loaded})")]
    AdCountsInconsistent {
        field: &'static str,
        count: u32,
        loaded: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdleServiceError {
    #[error("idle service refused the subscription: {0}")]
    Refused(String),
    #[error("idle service is shut down")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write telemetry: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode telemetry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("ping transport rejected submission: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("could not determine the user config directory")]
    NoConfigDir,
}

/// Errors surfaced by [`crate::WakeReportingScheduler`] operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("rejected categorization for page {page}: {source}")]
    Payload {
        page: PageId,
        #[source]
        source: PayloadError,
    },
    #[error(transparent)]
    IdleService(#[from] IdleServiceError),
}
