use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;

/// One weekly recurring service row from the `calendar` table.
pub struct WeeklyService {
    pub service_id: String,
    /// Monday-first weekday flags.
    pub weekdays: [bool; 7],
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One per-date override from the `calendar_dates` table.
pub struct ServiceException {
    pub service_id: String,
    pub date: NaiveDate,
    pub added: bool,
}

pub struct ServiceCalendar {
    pub weekly: Vec<WeeklyService>,
    pub exceptions: Vec<ServiceException>,
}

const WEEKDAY_COLUMNS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Decodes the parsed calendar tables. Rows with an unparseable or missing
/// date are skipped; exception codes other than added/removed are ignored.
pub fn decode_calendar(
    calendar: Option<&DataFrame>,
    calendar_dates: Option<&DataFrame>,
) -> PolarsResult<ServiceCalendar> {
    let mut weekly = Vec::new();
    if let Some(df) = calendar {
        let ids = df.column("service_id")?.as_materialized_series().str()?;
        let starts = df.column("start_date")?.as_materialized_series().str()?;
        let ends = df.column("end_date")?.as_materialized_series().str()?;
        let mut day_flags = Vec::with_capacity(7);
        for name in WEEKDAY_COLUMNS {
            day_flags.push(df.column(name)?.as_materialized_series().i64()?.clone());
        }
        for row in 0..df.height() {
            let (Some(id), Some(start), Some(end)) = (ids.get(row), starts.get(row), ends.get(row))
            else {
                continue;
            };
            let (Some(start), Some(end)) = (parse_feed_date(start), parse_feed_date(end)) else {
                continue;
            };
            let mut weekdays = [false; 7];
            for (day, flags) in weekdays.iter_mut().zip(&day_flags) {
                *day = flags.get(row) == Some(1);
            }
            weekly.push(WeeklyService {
                service_id: id.to_owned(),
                weekdays,
                start,
                end,
            });
        }
    }

    let mut exceptions = Vec::new();
    if let Some(df) = calendar_dates {
        let ids = df.column("service_id")?.as_materialized_series().str()?;
        let dates = df.column("date")?.as_materialized_series().str()?;
        let kinds = df.column("exception_type")?.as_materialized_series().i64()?;
        for row in 0..df.height() {
            let (Some(id), Some(date), Some(kind)) = (ids.get(row), dates.get(row), kinds.get(row))
            else {
                continue;
            };
            let Some(date) = parse_feed_date(date) else {
                continue;
            };
            let added = match kind {
                1 => true,
                2 => false,
                _ => continue,
            };
            exceptions.push(ServiceException {
                service_id: id.to_owned(),
                date,
                added,
            });
        }
    }

    Ok(ServiceCalendar { weekly, exceptions })
}

fn parse_feed_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y%m%d").ok()
}

/// The date range the calendar actually covers, clamped so a snapshot cannot
/// rewrite trip activity for dates before its own publication. `None` when
/// the calendar references no dates at all.
pub fn effective_range(
    calendar: &ServiceCalendar,
    modified: NaiveDate,
) -> Option<(NaiveDate, NaiveDate)> {
    let mut earliest: Option<NaiveDate> = None;
    let mut latest: Option<NaiveDate> = None;
    let mut widen = |start: NaiveDate, end: NaiveDate| {
        earliest = Some(earliest.map_or(start, |d| d.min(start)));
        latest = Some(latest.map_or(end, |d| d.max(end)));
    };
    for service in &calendar.weekly {
        widen(service.start, service.end);
    }
    for exception in &calendar.exceptions {
        widen(exception.date, exception.date);
    }
    Some((earliest?.max(modified), latest?))
}

/// The service ids active on one date: weekly rows covering the date with the
/// weekday flag set, plus added exceptions, minus removed exceptions.
pub fn active_services<'a>(calendar: &'a ServiceCalendar, date: NaiveDate) -> HashSet<&'a str> {
    let weekday = date.weekday().num_days_from_monday() as usize;
    let mut active: HashSet<&str> = calendar
        .weekly
        .iter()
        .filter(|s| s.start <= date && date <= s.end && s.weekdays[weekday])
        .map(|s| s.service_id.as_str())
        .collect();
    for exception in &calendar.exceptions {
        if exception.date != date {
            continue;
        }
        if exception.added {
            active.insert(exception.service_id.as_str());
        } else {
            active.remove(exception.service_id.as_str());
        }
    }
    active
}

/// Expands the calendar into one row per date in `start..=end`, carrying the
/// surrogate ids of the trips active on that date. `service_trips` pairs each
/// trip's service key with its surrogate id, in trip-table order.
pub fn expand_trip_dates(
    calendar: &ServiceCalendar,
    start: NaiveDate,
    end: NaiveDate,
    service_trips: &[(String, u32)],
) -> PolarsResult<DataFrame> {
    let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    let mut trips = ListPrimitiveChunkedBuilder::<UInt32Type>::new(
        "trip_id".into(),
        dates.len(),
        dates.len() * 8,
        DataType::UInt32,
    );
    for date in &dates {
        let active = active_services(calendar, *date);
        let day_trips: Vec<u32> = service_trips
            .iter()
            .filter(|(service, _)| active.contains(service.as_str()))
            .map(|(_, trip)| *trip)
            .collect();
        trips.append_slice(&day_trips);
    }
    let date_column = DateChunked::from_naive_date("date".into(), dates).into_column();
    DataFrame::new(vec![date_column, trips.finish().into_column()])
}

/// Replaces the previously stored rows from `start` onward with the fresh
/// expansion; older rows are kept verbatim.
pub fn merge_trip_dates(
    previous: Option<DataFrame>,
    fresh: DataFrame,
    start: NaiveDate,
) -> PolarsResult<DataFrame> {
    let Some(previous) = previous else {
        return Ok(fresh);
    };
    let mask: BooleanChunked = previous
        .column("date")?
        .as_materialized_series()
        .date()?
        .as_date_iter()
        .map(|d| Some(d.is_some_and(|d| d < start)))
        .collect();
    let kept = previous.filter(&mask)?;
    kept.select(fresh.get_column_names_owned())?.vstack(&fresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
    }

    fn weekday_calendar() -> ServiceCalendar {
        ServiceCalendar {
            weekly: vec![WeeklyService {
                service_id: "wk".to_owned(),
                weekdays: [true, true, true, true, true, false, false],
                start: date("2024-01-01"),
                end: date("2024-01-05"),
            }],
            exceptions: vec![],
        }
    }

    #[test]
    fn weekly_flags_gate_activity() {
        let calendar = weekday_calendar();
        // 2024-01-01 is a Monday.
        assert!(active_services(&calendar, date("2024-01-01")).contains("wk"));
        assert!(active_services(&calendar, date("2024-01-05")).contains("wk"));
        // Saturday within the range, flag unset.
        assert!(active_services(&calendar, date("2024-01-06")).is_empty());
        // Outside the validity range.
        assert!(active_services(&calendar, date("2024-01-08")).is_empty());
    }

    #[test]
    fn exceptions_override_the_weekly_pattern() {
        let mut calendar = weekday_calendar();
        calendar.exceptions.push(ServiceException {
            service_id: "wk".to_owned(),
            date: date("2024-01-03"),
            added: false,
        });
        calendar.exceptions.push(ServiceException {
            service_id: "extra".to_owned(),
            date: date("2024-01-06"),
            added: true,
        });
        assert!(active_services(&calendar, date("2024-01-03")).is_empty());
        assert!(active_services(&calendar, date("2024-01-02")).contains("wk"));
        assert!(active_services(&calendar, date("2024-01-06")).contains("extra"));
    }

    #[test]
    fn modification_date_clamps_the_range() {
        let calendar = weekday_calendar();
        let range = effective_range(&calendar, date("2024-01-03")).unwrap();
        assert_eq!(range, (date("2024-01-03"), date("2024-01-05")));
        let range = effective_range(&calendar, date("2023-12-01")).unwrap();
        assert_eq!(range, (date("2024-01-01"), date("2024-01-05")));
    }

    #[test]
    fn empty_calendar_has_no_range() {
        let calendar = ServiceCalendar {
            weekly: vec![],
            exceptions: vec![],
        };
        assert!(effective_range(&calendar, date("2024-01-01")).is_none());
    }

    #[test]
    fn expansion_covers_every_date_in_range() {
        let calendar = weekday_calendar();
        let trips = vec![("wk".to_owned(), 7u32)];
        let df = expand_trip_dates(
            &calendar,
            date("2024-01-01"),
            date("2024-01-07"),
            &trips,
        )
        .unwrap();
        assert_eq!(df.height(), 7);
        let lists = df
            .column("trip_id")
            .unwrap()
            .as_materialized_series()
            .list()
            .unwrap()
            .clone();
        let sizes: Vec<usize> = (0..df.height())
            .map(|i| lists.get_as_series(i).map_or(0, |s| s.len()))
            .collect();
        assert_eq!(sizes, vec![1, 1, 1, 1, 1, 0, 0]);
    }
}
