//! The metering core: turning usage events into billed daily and monthly
//! totals per client, user and model.

pub mod calculator;
pub mod counters;
pub mod dedup;
pub mod event;
pub mod query;
pub mod recorder;
pub mod rollover;
pub mod types;
pub mod units;

pub use calculator::{
    BatchResult, ClientContext, GenerationCost, batch_cost, generation_cost, markup_cost,
};
pub use counters::{ApplyOutcome, ClientLocks, CounterSnapshot, CounterUsage, LiveCounterStore};
pub use dedup::{GenerationDeduplicator, ProcessedEntry, PruneReport};
pub use event::{NormalizationPolicy, RawUsageEvent, TokenSource, TokenSplitPolicy, UsageEvent};
pub use query::{
    BudgetStatus, ClientBillingSummary, DailyBreakdown, DaySource, DayUsage, LiveContribution,
    ModelBreakdown, ModelUsage, MonthToDate, RangeTotals, UsageStatsQueryService, UserBreakdown,
    UserUsage,
};
pub use recorder::{AppliedUsage, IngestFailure, IngestReport, RecordOutcome, UsageRecorder};
pub use rollover::{ClosedDay, DailyRolloverEngine, RolloverResult, SweepReport};
pub use types::{DateRange, UsageTotals};
