pub mod client_daily_usage;
pub mod client_live_counters;
pub mod client_model_daily_usage;
pub mod client_model_live_counters;
pub mod client_organizations;
pub mod client_user_daily_usage;
pub mod client_user_live_counters;
pub mod processed_generations;

pub use client_daily_usage::Entity as ClientDailyUsage;
pub use client_live_counters::Entity as ClientLiveCounters;
pub use client_model_daily_usage::Entity as ClientModelDailyUsage;
pub use client_model_live_counters::Entity as ClientModelLiveCounters;
pub use client_organizations::Entity as ClientOrganizations;
pub use client_user_daily_usage::Entity as ClientUserDailyUsage;
pub use client_user_live_counters::Entity as ClientUserLiveCounters;
pub use processed_generations::Entity as ProcessedGenerations;

// Type aliases
pub type ClientOrganization = client_organizations::Model;
pub type ProcessedGeneration = processed_generations::Model;
pub type LiveCounterRecord = client_live_counters::Model;
pub type UserLiveCounterRecord = client_user_live_counters::Model;
pub type ModelLiveCounterRecord = client_model_live_counters::Model;
pub type ClientDailyUsageRecord = client_daily_usage::Model;
pub type UserDailyUsageRecord = client_user_daily_usage::Model;
pub type ModelDailyUsageRecord = client_model_daily_usage::Model;
