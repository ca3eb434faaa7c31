pub mod clock;
pub mod config;
pub mod error;
pub mod idle;
pub mod record;
pub mod scheduler;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Environment, SchedulerConfig, TelemetryConfig};
pub use error::{ConfigError, IdleServiceError, PayloadError, SchedulerError, SinkError};
pub use idle::{ChannelIdleService, IdleService, IdleSignal, IdleSubscription, SubscriptionId};
pub use record::{
    AdCounts, CategorizationPayload, Category, PageId, PendingRecord, ProviderInfo, ResultCounts,
};
pub use scheduler::{ActivityState, ReportReason, WakeReportingScheduler};
pub use telemetry::{
    CategorizationEvent, JsonLinesSink, MemorySink, Ping, PingBatcher, PingTransport,
    TelemetrySink,
};
