//! Recurrence period arithmetic: turning an offer's `{period_kind,
//! period_count}` plus a `recurrence_basetime` into the concrete
//! `[starttime, endtime]` window (and surrounding paywindow) for a given
//! period index.
//!
//! §9 design note (2): `months`/`years` are NOT resolved as fixed 30-day /
//! 365-day durations -- that silently drifts the anchor date across a
//! handful of periods (e.g. twelve 30-day "months" land ~5 days before the
//! next calendar anniversary). Instead every period boundary is computed by
//! stepping the *calendar* forward from `basetime` by `period_count *
//! period_index` months or years, using `chrono`'s calendar-aware
//! arithmetic, then converting back to a unix timestamp.
//!
//! This module only computes the window; enforcing `recurrence_limit` and
//! deciding *whether* to compute a next period at all is [`crate::engine`]'s
//! job (C7 step 8), since that also needs the offer's `recurrence_limit`.

use chrono::{Datelike, Months, NaiveDateTime, TimeZone, Utc};

use crate::{
    error::{OffersError, OffersErrorKind},
    fields::{Recurrence, RecurrencePaywindow, RecurrencePeriodKind},
};

/// A resolved next-payment window, as surfaced to the user alongside a
/// successfully validated invoice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NextPeriod {
    pub counter: u32,
    pub starttime: u64,
    pub endtime: u64,
    pub paywindow_start: u64,
    pub paywindow_end: u64,
}

fn overflow_err() -> OffersError {
    OffersError::new(
        OffersErrorKind::SemanticError,
        "recurrence period arithmetic overflowed",
    )
}

fn to_datetime(unix_secs: u64) -> Result<NaiveDateTime, OffersError> {
    let secs = i64::try_from(unix_secs).map_err(|_| overflow_err())?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.naive_utc())
        .ok_or_else(overflow_err)
}

fn from_datetime(dt: NaiveDateTime) -> Result<u64, OffersError> {
    let secs = Utc.from_utc_datetime(&dt).timestamp();
    u64::try_from(secs).map_err(|_| overflow_err())
}

/// `basetime` advanced by `period_count * num_periods` units of `kind`.
fn advance(
    basetime: u64,
    kind: RecurrencePeriodKind,
    period_count: u32,
    num_periods: u64,
) -> Result<u64, OffersError> {
    match kind {
        RecurrencePeriodKind::Seconds | RecurrencePeriodKind::Days => {
            let unit_secs: u64 = match kind {
                RecurrencePeriodKind::Seconds => 1,
                RecurrencePeriodKind::Days => 86_400,
                _ => unreachable!(),
            };
            let total_periods = (period_count as u64)
                .checked_mul(num_periods)
                .ok_or_else(overflow_err)?;
            let delta = total_periods
                .checked_mul(unit_secs)
                .ok_or_else(overflow_err)?;
            basetime.checked_add(delta).ok_or_else(overflow_err)
        }
        RecurrencePeriodKind::Months | RecurrencePeriodKind::Years => {
            let months_per_period: u64 = match kind {
                RecurrencePeriodKind::Months => 1,
                RecurrencePeriodKind::Years => 12,
                _ => unreachable!(),
            };
            let total_months = (period_count as u64)
                .checked_mul(months_per_period)
                .and_then(|m| m.checked_mul(num_periods))
                .ok_or_else(overflow_err)?;
            let total_months = u32::try_from(total_months)
                .map_err(|_| overflow_err())?;
            let dt = to_datetime(basetime)?;
            let advanced = dt
                .checked_add_months(Months::new(total_months))
                .ok_or_else(overflow_err)?;
            from_datetime(advanced)
        }
    }
}

/// Compute the next recurrence window per spec §4.7 step 8, given the
/// counter *about to be requested* (i.e. the counter of the request that
/// just completed).
pub fn next_period(
    basetime: u64,
    recurrence: Recurrence,
    recurrence_start: Option<u32>,
    completed_counter: u32,
    paywindow: Option<RecurrencePaywindow>,
) -> Result<NextPeriod, OffersError> {
    let next_counter = completed_counter
        .checked_add(1)
        .ok_or_else(overflow_err)?;
    let next_period_idx = (recurrence_start.unwrap_or(0) as u64)
        .checked_add(next_counter as u64)
        .ok_or_else(overflow_err)?;
    let prior_idx = next_period_idx
        .checked_sub(1)
        .ok_or_else(overflow_err)?;

    let starttime = advance(
        basetime,
        recurrence.period_kind,
        recurrence.period_count,
        prior_idx,
    )?;
    let endtime = advance(
        basetime,
        recurrence.period_kind,
        recurrence.period_count,
        next_period_idx,
    )?
    .checked_sub(1)
    .ok_or_else(overflow_err)?;

    let (paywindow_start, paywindow_end) = match paywindow {
        Some(p) => (
            starttime.saturating_sub(p.before as u64),
            starttime.saturating_add(p.after as u64),
        ),
        None => (starttime, starttime),
    };

    Ok(NextPeriod {
        counter: next_counter,
        starttime,
        endtime,
        paywindow_start,
        paywindow_end,
    })
}

/// True iff `now` falls within `[paywindow_start, paywindow_end]`.
pub fn in_paywindow(period: &NextPeriod, now: u64) -> bool {
    (period.paywindow_start..=period.paywindow_end).contains(&now)
}
