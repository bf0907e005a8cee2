use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{error::ChargeRuleError, money::Money};

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatePeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DatePeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ChargeRuleError> {
        if start > end {
            return Err(ChargeRuleError::InvalidPeriod { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Calendar months touched by the period, counting partial months.
    pub fn months(&self) -> u32 {
        let span = (self.end.year() - self.start.year()) * 12 + self.end.month() as i32
            - self.start.month() as i32
            + 1;
        span.max(0) as u32
    }
}

/// Occupied part of a calendar year for one lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupancyWindow {
    pub year: i32,
    pub period: DatePeriod,
    pub days_occupied: i64,
    pub days_in_year: i64,
}

impl OccupancyWindow {
    pub fn fraction(&self) -> Decimal {
        prorata_fraction(self.days_occupied, self.days_in_year)
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month >= 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next_month_first
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(0)
}

pub fn days_in_year(year: i32) -> i64 {
    (1..=12).map(|month| i64::from(days_in_month(year, month))).sum()
}

/// `occupied / total` kept exact; zero when the total is zero.
pub fn prorata_fraction(occupied_days: i64, total_days: i64) -> Decimal {
    if total_days <= 0 || occupied_days <= 0 {
        return Decimal::ZERO;
    }
    Decimal::from(occupied_days) / Decimal::from(total_days)
}

pub fn prorated_amount(full_amount: Money, fraction: Decimal) -> Money {
    full_amount.scale(fraction)
}

/// Intersection of the lease with the calendar year, or `None` when the lease
/// does not cover a single day of it. An open-ended lease runs to Dec 31.
pub fn occupancy_window(
    lease_start: NaiveDate,
    lease_end: Option<NaiveDate>,
    year: i32,
) -> Option<OccupancyWindow> {
    let first = year_start(year)?;
    let last = year_end(year)?;

    let start = lease_start.max(first);
    let end = lease_end.unwrap_or(last).min(last);
    if start > end {
        return None;
    }

    let period = DatePeriod { start, end };
    Some(OccupancyWindow {
        year,
        period,
        days_occupied: period.day_count(),
        days_in_year: days_in_year(year),
    })
}

/// Provisions the tenant should have paid over the window: twelve monthly
/// provisions prorated to the occupied days.
pub fn theoretical_provisions(monthly_provision: Money, window: &OccupancyWindow) -> Money {
    let yearly = monthly_provision.scale(Decimal::from(12));
    prorated_amount(yearly, window.fraction())
}

fn year_start(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
}

fn year_end(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
}
