//! Decides which hourly statistics still have to be written and where the
//! import watermark moves afterwards.

use crate::model::{HourlyStatistic, PartialHourPolicy, StatisticEntry};
use crate::state::{ImportState, OpenHour};
use chrono::{DateTime, Utc};

/// Entries to write plus the import progress to store once they are written.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPlan {
    pub entries: Vec<StatisticEntry>,
    /// Statistics dropped because the sink already holds them
    pub skipped: usize,
    pub last_imported_hour: Option<DateTime<Utc>>,
    pub running_total_kwh: f64,
    pub open_hours: Vec<OpenHour>,
}

impl ImportPlan {
    /// Whether applying the plan would change the stored progress.
    pub fn moves_progress(&self, state: &ImportState) -> bool {
        self.last_imported_hour != state.last_imported_hour
            || self.running_total_kwh != state.running_total_kwh
            || self.open_hours != state.open_hours
    }

    pub fn apply(&self, state: &mut ImportState) {
        state.last_imported_hour = self.last_imported_hour;
        state.running_total_kwh = self.running_total_kwh;
        state.open_hours = self.open_hours.clone();
    }
}

/// Plans the import of `stats` (ordered by hour) on top of `state`.
///
/// Hours at or before the watermark are dropped. Running totals continue
/// from the stored total. Under [`PartialHourPolicy::Overwrite`] the
/// watermark stops at the last complete hour and the partial hours after it
/// stay open; an open hour is rewritten only when its half-hour count
/// changed or an earlier hour in the plan was written.
pub fn plan_import(
    stats: &[HourlyStatistic],
    state: &ImportState,
    policy: PartialHourPolicy,
) -> ImportPlan {
    let (fresh, stale): (Vec<&HourlyStatistic>, Vec<&HourlyStatistic>) = stats
        .iter()
        .partition(|s| state.last_imported_hour.map_or(true, |w| s.start > w));

    let final_until = match policy {
        PartialHourPolicy::Overwrite => fresh.iter().rev().find(|s| s.is_complete()),
        PartialHourPolicy::Skip => fresh.last(),
    }
    .map(|s| s.start);

    let mut plan = ImportPlan {
        entries: Vec::with_capacity(fresh.len()),
        skipped: stale.len(),
        last_imported_hour: state.last_imported_hour,
        running_total_kwh: state.running_total_kwh,
        open_hours: Vec::new(),
    };
    let mut total = state.running_total_kwh;

    for stat in fresh {
        total += stat.sum_kwh;

        if final_until.is_some_and(|f| stat.start <= f) {
            plan.last_imported_hour = Some(stat.start);
            plan.running_total_kwh = total;
        } else {
            plan.open_hours.push(OpenHour {
                start: stat.start,
                half_hours: stat.half_hours,
            });
        }

        let already_written = state
            .open_hours
            .iter()
            .any(|open| open.start == stat.start && open.half_hours == stat.half_hours);
        if already_written && plan.entries.is_empty() {
            plan.skipped += 1;
            continue;
        }

        plan.entries.push(StatisticEntry {
            start: stat.start,
            value_kwh: stat.sum_kwh,
            running_total_kwh: total,
            half_hours: stat.half_hours,
        });
    }

    plan
}
