use super::units::from_nanos;
use crate::database::CounterDelta;
use crate::database::entities::{
    ClientDailyUsageRecord, LiveCounterRecord, ModelDailyUsageRecord, ModelLiveCounterRecord,
    UserDailyUsageRecord, UserLiveCounterRecord,
};
use crate::error::{MeteringError, MeteringResult};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Additive usage figures in domain units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_requests: i64,
    pub raw_cost: Decimal,
    pub markup_cost: Decimal,
}

impl UsageTotals {
    pub fn profit(&self) -> Decimal {
        self.markup_cost - self.raw_cost
    }

    pub fn is_empty(&self) -> bool {
        self.total_requests == 0 && self.total_tokens == 0
    }

    fn from_columns(
        total_tokens: i64,
        input_tokens: i64,
        output_tokens: i64,
        total_requests: i64,
        raw_cost_nanos: i64,
        markup_cost_nanos: i64,
    ) -> Self {
        Self {
            total_tokens,
            input_tokens,
            output_tokens,
            total_requests,
            raw_cost: from_nanos(raw_cost_nanos),
            markup_cost: from_nanos(markup_cost_nanos),
        }
    }
}

impl AddAssign for UsageTotals {
    fn add_assign(&mut self, other: Self) {
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_requests = self.total_requests.saturating_add(other.total_requests);
        self.raw_cost += other.raw_cost;
        self.markup_cost += other.markup_cost;
    }
}

impl std::iter::Sum for UsageTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, item| {
            acc += item;
            acc
        })
    }
}

macro_rules! totals_from_record {
    ($($record:ty),+ $(,)?) => {
        $(
            impl From<&$record> for UsageTotals {
                fn from(record: &$record) -> Self {
                    Self::from_columns(
                        record.total_tokens,
                        record.input_tokens,
                        record.output_tokens,
                        record.total_requests,
                        record.raw_cost_nanos,
                        record.markup_cost_nanos,
                    )
                }
            }
        )+
    };
}

totals_from_record!(
    LiveCounterRecord,
    UserLiveCounterRecord,
    ModelLiveCounterRecord,
    ClientDailyUsageRecord,
    UserDailyUsageRecord,
    ModelDailyUsageRecord,
);

/// The storage delta carried by a live breakdown row
macro_rules! delta_from_record {
    ($($record:ty),+ $(,)?) => {
        $(
            impl From<&$record> for CounterDelta {
                fn from(record: &$record) -> Self {
                    CounterDelta {
                        input_tokens: record.input_tokens,
                        output_tokens: record.output_tokens,
                        requests: record.total_requests,
                        raw_cost_nanos: record.raw_cost_nanos,
                        markup_cost_nanos: record.markup_cost_nanos,
                    }
                }
            }
        )+
    };
}

delta_from_record!(LiveCounterRecord, UserLiveCounterRecord, ModelLiveCounterRecord);

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> MeteringResult<Self> {
        if start > end {
            return Err(MeteringError::invalid(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// First of the month through `today`
    pub fn month_to_date(today: NaiveDate) -> Self {
        Self {
            start: first_of_month(today),
            end: today,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}
