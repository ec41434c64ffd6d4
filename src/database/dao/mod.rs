pub mod clients;
pub mod clients_cached;
pub mod daily_usage;
pub mod generations;
pub mod live_counters;

pub use clients::{ClientOrganizationsDao, NewClientOrganization};
pub use clients_cached::CachedClientOrganizationsDao;
pub use daily_usage::{ClientDay, DailyUsageDao};
pub use generations::ProcessedGenerationsDao;
pub use live_counters::{CounterDelta, LiveCountersDao};
