use chrono::{DateTime, Datelike, Months, Utc};

/// Length of one usage period, in calendar months.
pub const PERIOD_MONTHS: u32 = 1;

/// Reset date of the first period starting at `start`.
pub fn first_reset_date(start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    start.checked_add_months(Months::new(PERIOD_MONTHS))
}

/// Earliest period boundary after `now`, counted in whole periods from `anchor`.
///
/// Boundaries are always derived from the anchor so month-end clamping
/// (Jan 31 → Feb 28) does not drift later periods.
pub fn next_reset_date(anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let elapsed_months = (now.year() - anchor.year()) * 12 + now.month() as i32
        - anchor.month() as i32;
    let elapsed_periods = (elapsed_months.max(0) as u32) / PERIOD_MONTHS;
    let mut periods = elapsed_periods.max(1);

    loop {
        let candidate = anchor.checked_add_months(Months::new(periods * PERIOD_MONTHS))?;
        if candidate > now {
            return Some(candidate);
        }
        periods = periods.checked_add(1)?;
    }
}

/// Start of the period that ends at `reset_date`.
pub fn period_start(reset_date: DateTime<Utc>) -> Option<DateTime<Utc>> {
    reset_date.checked_sub_months(Months::new(PERIOD_MONTHS))
}
