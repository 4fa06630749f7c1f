pub mod client;
pub mod config;
pub mod cursor;
pub mod discovery;
pub mod error;
pub mod progress;
pub mod record;
pub mod scheduler;
pub mod search;
pub mod sink;
pub mod snowflake;
pub mod store;
pub mod tail;
pub mod timeframe;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Direction, HttpTransport, RateLimitedClient, RawResponse, RetryBudget, Transport};
pub use config::{ClientConfig, ScrollbackPaths, Settings};
pub use cursor::{Cursor, CursorEvent, CursorOutcome, CursorReport, CursorState, Frontier};
pub use discovery::{Discovery, DmChannel, Guild, GuildChannel};
pub use error::{ArchiveError, Result};
pub use progress::{emit_error, emit_progress, emit_result};
pub use record::{archive_filename, MessageRecord, RawMessage};
pub use scheduler::{
    CoverageGap, FetchPlan, FetchSummary, ProgressUpdate, RunOutcome, Scheduler, SchedulerConfig,
    SchedulerPhase,
};
pub use search::{ArchiveIndex, IndexedRecord, Query, MAX_RESULTS};
pub use sink::{ArchiveSink, JsonFileSink};
pub use snowflake::Snowflake;
pub use store::MergeStore;
pub use tail::{TailSummary, Tailer};
pub use timeframe::{parse_time_frame, TimeFrame, TimeUnit};
