//! Factors per-trip stop-visit schedules into two deduplicated tables: the
//! ordered stop pattern (`sequences`) and the dwell/travel offsets over a
//! pattern (`timings`). Feeds repeat the same pattern across many trips that
//! differ only by start time, so storage grows with the number of distinct
//! patterns rather than the number of trips.

use polars::prelude::*;

use crate::feed_archive::{self, PICKUP_DROP_OFF_LABELS};
use crate::registry;
use crate::service_time::time_to_seconds_expr;

/// The merged pattern tables plus the per-trip schedule references consumed
/// by trip construction.
pub struct TripSchedules {
    pub sequences: DataFrame,
    pub timings: DataFrame,
    /// One row per feed trip key: `original_trip_id`, `start_time`,
    /// `timing_id`, `sequence_id`.
    pub trip_refs: DataFrame,
}

/// Normalizes the parsed stop_times table into per-visit rows: stop
/// references resolved to surrogate ids, times decoded to seconds, dwell and
/// inter-stop durations computed within each trip.
pub fn prepare_stop_visits(stop_times: DataFrame, stop_map: &DataFrame) -> PolarsResult<DataFrame> {
    let resolved = registry::resolve_column(
        stop_times.lazy(),
        stop_map,
        "original_stop_id",
        "stop_id",
        "original_stop_id",
        "stop_id",
    )?;
    resolved
        .sort(["original_trip_id", "stop_sequence"], SortMultipleOptions::default())
        .with_columns([
            time_to_seconds_expr("arrival_time"),
            time_to_seconds_expr("departure_time"),
        ])
        .with_columns([
            (col("departure_time").cast(DataType::Int64)
                - col("arrival_time").cast(DataType::Int64))
            .cast(DataType::UInt32)
            .alias("stopping_time"),
            (col("arrival_time")
                .shift(lit(-1))
                .over([col("original_trip_id")])
                .cast(DataType::Int64)
                - col("departure_time").cast(DataType::Int64))
            .cast(DataType::UInt32)
            .alias("between_stop_time"),
        ])
        .with_columns([
            feed_archive::code_label_expr("pickup_type", PICKUP_DROP_OFF_LABELS, None),
            feed_archive::code_label_expr("drop_off_type", PICKUP_DROP_OFF_LABELS, None),
        ])
        .select([
            col("original_trip_id"),
            col("arrival_time"),
            col("stopping_time"),
            col("between_stop_time"),
            col("stop_id"),
            col("pickup_type"),
            col("drop_off_type"),
        ])
        .collect()
}

/// Builds the merged `sequences` and `timings` tables from the per-visit
/// rows and resolves every trip's schedule references against them.
pub fn normalize_schedules(
    stop_visits: &DataFrame,
    previous_sequences: Option<DataFrame>,
    previous_timings: Option<DataFrame>,
) -> PolarsResult<TripSchedules> {
    log::info!("Creating stop sequences.");
    let sequence_candidates = stop_visits
        .clone()
        .lazy()
        .group_by_stable([col("original_trip_id")])
        .agg([col("stop_id"), col("pickup_type"), col("drop_off_type")])
        .select([col("stop_id"), col("pickup_type"), col("drop_off_type")])
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    let sequences = registry::register(previous_sequences, sequence_candidates, "sequence_id")?;

    log::info!("Creating stop timings.");
    let timing_candidates = stop_visits
        .clone()
        .lazy()
        .group_by_stable([col("original_trip_id")])
        .agg([
            col("stopping_time"),
            col("between_stop_time"),
            col("stop_id"),
            col("pickup_type"),
            col("drop_off_type"),
        ])
        .select([
            col("stopping_time"),
            col("between_stop_time"),
            col("stop_id"),
            col("pickup_type"),
            col("drop_off_type"),
        ])
        .unique_stable(None, UniqueKeepStrategy::First);
    let timing_candidates = registry::left_join(
        timing_candidates,
        sequences.clone().lazy(),
        &["stop_id", "pickup_type", "drop_off_type"],
    )
    .select([
        col("stopping_time"),
        col("between_stop_time"),
        col("sequence_id"),
    ])
    .collect()?;
    let timings = registry::register(previous_timings, timing_candidates, "timing_id")?;

    log::info!("Resolving trip schedule references.");
    let trip_refs = stop_visits
        .clone()
        .lazy()
        .group_by_stable([col("original_trip_id")])
        .agg([
            col("stopping_time"),
            col("between_stop_time"),
            col("stop_id"),
            col("pickup_type"),
            col("drop_off_type"),
            col("arrival_time").first().alias("start_time"),
        ]);
    let trip_refs = registry::left_join(
        trip_refs,
        sequences.clone().lazy(),
        &["stop_id", "pickup_type", "drop_off_type"],
    );
    let trip_refs = registry::left_join(
        trip_refs,
        timings.clone().lazy(),
        &["stopping_time", "between_stop_time", "sequence_id"],
    )
    .select([
        col("original_trip_id"),
        col("start_time"),
        col("timing_id"),
        col("sequence_id"),
    ])
    .collect()?;

    Ok(TripSchedules {
        sequences,
        timings,
        trip_refs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit_rows() -> DataFrame {
        // Two trips over the same two stops with the same offsets, one trip
        // with a different dwell at the first stop.
        df!(
            "original_trip_id" => ["t1", "t1", "t2", "t2", "t3", "t3"],
            "arrival_time" => [
                "08:00:00", "08:10:00",
                "09:00:00", "09:10:00",
                "10:00:00", "10:10:30",
            ],
            "departure_time" => [
                "08:00:00", "08:10:00",
                "09:00:00", "09:10:00",
                "10:00:30", "10:10:30",
            ],
            "original_stop_id" => ["a", "b", "a", "b", "a", "b"],
            "stop_sequence" => [1u32, 2, 1, 2, 1, 2],
            "pickup_type" => vec![None::<i64>; 6],
            "drop_off_type" => vec![None::<i64>; 6],
        )
        .unwrap()
    }

    fn stop_map() -> DataFrame {
        df!("original_stop_id" => ["a", "b"], "stop_id" => [0u32, 1]).unwrap()
    }

    #[test]
    fn computes_visit_durations() {
        let visits = prepare_stop_visits(visit_rows(), &stop_map()).unwrap();
        let stopping = visits
            .column("stopping_time")
            .unwrap()
            .as_materialized_series()
            .u32()
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>();
        let between = visits
            .column("between_stop_time")
            .unwrap()
            .as_materialized_series()
            .u32()
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>();
        assert_eq!(stopping, vec![Some(0), Some(0), Some(0), Some(0), Some(30), Some(0)]);
        // The last visit of each trip has no inter-stop duration.
        assert_eq!(between, vec![Some(600), None, Some(600), None, Some(600), None]);
    }

    #[test]
    fn shared_patterns_collapse() {
        let visits = prepare_stop_visits(visit_rows(), &stop_map()).unwrap();
        let schedules = normalize_schedules(&visits, None, None).unwrap();
        // One stop pattern shared by all three trips.
        assert_eq!(schedules.sequences.height(), 1);
        // Two distinct offset shapes: t1/t2 share one, t3 has its own dwell.
        assert_eq!(schedules.timings.height(), 2);
        assert_eq!(schedules.trip_refs.height(), 3);

        let start_times = schedules
            .trip_refs
            .column("start_time")
            .unwrap()
            .as_materialized_series()
            .u32()
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>();
        assert_eq!(
            start_times,
            vec![Some(8 * 3600), Some(9 * 3600), Some(10 * 3600)]
        );
    }

    #[test]
    fn remerge_keeps_one_row_per_pattern() {
        let visits = prepare_stop_visits(visit_rows(), &stop_map()).unwrap();
        let first = normalize_schedules(&visits, None, None).unwrap();
        let second = normalize_schedules(
            &visits,
            Some(first.sequences.clone()),
            Some(first.timings.clone()),
        )
        .unwrap();
        assert_eq!(second.sequences.height(), first.sequences.height());
        assert_eq!(second.timings.height(), first.timings.height());
    }
}
