use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use polars::prelude::*;

use crate::error::MergeError;
use crate::feed_archive::{
    self, FeedArchive, AGENCY_SPEC, BIKES_ALLOWED_LABELS, CALENDAR_DATES_SPEC, CALENDAR_SPEC,
    LOCATION_TYPE_LABELS, ROUTES_SPEC, ROUTE_TYPE_LABELS, STOPS_SPEC, STOP_TIMES_SPEC,
    TRANSFERS_SPEC, TRANSFER_TYPE_LABELS, TRIPS_SPEC,
};
use crate::registry;
use crate::schedule_patterns;
use crate::service_calendar;
use crate::stop_hierarchy;
use crate::table_store::TableStore;

/// Row counts of the tables written by one successful merge.
#[derive(Debug)]
pub struct MergeSummary {
    pub agencies: usize,
    pub routes: usize,
    pub stops: usize,
    pub sequences: usize,
    pub timings: usize,
    pub trips: usize,
    pub transfers: Option<usize>,
    pub trip_dates: usize,
}

impl fmt::Display for MergeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} agencies, {} routes, {} stops, {} sequences, {} timings, {} trips, {} trip dates",
            self.agencies,
            self.routes,
            self.stops,
            self.sequences,
            self.timings,
            self.trips,
            self.trip_dates,
        )?;
        if let Some(transfers) = self.transfers {
            write!(f, ", {transfers} transfers")?;
        }
        Ok(())
    }
}

/// Folds one feed snapshot into the feed's persisted tables.
///
/// Every table is rebuilt in full (previous rows + new rows, deduplicated,
/// re-enumerated) in local working frames; nothing is written until every
/// stage has succeeded, so a failing snapshot leaves the store untouched.
pub fn merge_snapshot<S: TableStore>(
    store: &S,
    feed_id: &str,
    archive_bytes: &[u8],
    modified: NaiveDate,
) -> Result<MergeSummary, MergeError> {
    let mut archive = FeedArchive::open(archive_bytes)?;

    let agencies_raw = feed_archive::require_table(&mut archive, &AGENCY_SPEC)?;
    let routes_raw = feed_archive::require_table(&mut archive, &ROUTES_SPEC)?;
    let stops_raw = feed_archive::require_table(&mut archive, &STOPS_SPEC)?;
    let stop_times_raw = feed_archive::require_table(&mut archive, &STOP_TIMES_SPEC)?;
    let trips_raw = feed_archive::require_table(&mut archive, &TRIPS_SPEC)?;
    let transfers_raw = feed_archive::read_table(&mut archive, &TRANSFERS_SPEC)?;
    let calendar_raw = feed_archive::read_table(&mut archive, &CALENDAR_SPEC)?;
    let calendar_dates_raw = feed_archive::read_table(&mut archive, &CALENDAR_DATES_SPEC)?;
    if calendar_raw.is_none() && calendar_dates_raw.is_none() {
        return Err(MergeError::MissingRequiredTable { table: "calendar" });
    }

    log::info!("Collecting agencies.");
    let agencies = registry::register(store.load(feed_id, "agencies")?, agencies_raw, "agency_id")?;
    let agency_map = registry::key_map(&agencies, "original_agency_id", "agency_id")?;

    log::info!("Collecting routes.");
    let routes_fresh = routes_raw
        .lazy()
        .with_column(feed_archive::code_label_expr(
            "route_type",
            ROUTE_TYPE_LABELS,
            None,
        ));
    let routes_fresh = registry::resolve_column(
        routes_fresh,
        &agency_map,
        "original_agency_id",
        "agency_id",
        "original_agency_id",
        "agency_id",
    )?
    .collect()?;
    let routes = registry::register(store.load(feed_id, "routes")?, routes_fresh, "route_id")?;
    let route_map = registry::key_map(&routes, "original_route_id", "route_id")?;

    log::info!("Collecting stops.");
    let stops_fresh = stops_raw
        .lazy()
        .with_column(feed_archive::code_label_expr(
            "location_type",
            LOCATION_TYPE_LABELS,
            Some("stop"),
        ))
        .collect()?;
    let resolved_stops = stop_hierarchy::resolve_stops(store.load(feed_id, "stops")?, stops_fresh)?;

    log::info!("Collecting stop times.");
    let stop_visits =
        schedule_patterns::prepare_stop_visits(stop_times_raw, &resolved_stops.stop_map)?;
    let schedules = schedule_patterns::normalize_schedules(
        &stop_visits,
        store.load(feed_id, "sequences")?,
        store.load(feed_id, "timings")?,
    )?;

    log::info!("Collecting trips.");
    let trips_fresh = registry::resolve_column(
        trips_raw.lazy(),
        &route_map,
        "original_route_id",
        "route_id",
        "original_route_id",
        "route_id",
    )?;
    let trips_fresh = registry::left_join(
        trips_fresh,
        schedules.trip_refs.clone().lazy(),
        &["original_trip_id"],
    );
    let trips_full = trips_fresh
        .with_columns([
            feed_archive::direction_flag_expr("direction_id"),
            feed_archive::code_label_expr("bikes_allowed", BIKES_ALLOWED_LABELS, Some("unknown")),
        ])
        .select([
            col("route_id"),
            col("original_trip_id"),
            col("start_time"),
            col("timing_id"),
            col("sequence_id"),
            col("trip_headsign"),
            col("trip_short_name"),
            col("direction_id").alias("opposite_direction"),
            col("bikes_allowed"),
            col("service_id"),
        ])
        .collect()?;
    let trip_services = trips_full.select(["original_trip_id", "service_id"])?;
    let trip_content = trips_full.drop("original_trip_id")?.drop("service_id")?;
    let trips = registry::register(store.load(feed_id, "trips")?, trip_content.clone(), "trip_id")?;
    // The feed's trip keys are transient: they take no part in trip identity,
    // so the key→id map comes from looking fresh rows back up by content.
    let content_columns: Vec<String> = trip_content
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let trip_map = registry::left_join_on_content(
        trips_full.drop("service_id")?.lazy(),
        trips.clone().lazy(),
        &content_columns,
    )
    .select([col("original_trip_id"), col("trip_id")])
    .collect()?;

    let transfers = match transfers_raw {
        Some(raw) => Some(merge_transfers(
            store,
            feed_id,
            raw,
            &resolved_stops.stop_map,
            &route_map,
            &trip_map,
        )?),
        None => None,
    };

    log::info!("Processing calendars.");
    let calendar =
        service_calendar::decode_calendar(calendar_raw.as_ref(), calendar_dates_raw.as_ref())?;
    let Some((start, end)) = service_calendar::effective_range(&calendar, modified) else {
        return Err(MergeError::MissingRequiredTable { table: "calendar" });
    };
    log::info!("Finding trips by date ({start} to {end}).");
    let service_trips = service_trip_pairs(&trip_services, &trip_map)?;
    let fresh_trip_dates =
        service_calendar::expand_trip_dates(&calendar, start, end, &service_trips)?;
    let trip_dates =
        service_calendar::merge_trip_dates(store.load(feed_id, "trip_dates")?, fresh_trip_dates, start)?;

    let summary = MergeSummary {
        agencies: agencies.height(),
        routes: routes.height(),
        stops: resolved_stops.stops.height(),
        sequences: schedules.sequences.height(),
        timings: schedules.timings.height(),
        trips: trips.height(),
        transfers: transfers.as_ref().map(DataFrame::height),
        trip_dates: trip_dates.height(),
    };

    log::info!("Persisting tables.");
    let mut tables = vec![
        ("agencies", agencies),
        ("routes", routes),
        ("stops", resolved_stops.stops),
        ("sequences", schedules.sequences),
        ("timings", schedules.timings),
        ("trips", trips),
        ("trip_dates", trip_dates),
    ];
    if let Some(transfers) = transfers {
        tables.push(("transfers", transfers));
    }
    for (table, mut df) in tables {
        store
            .save(feed_id, table, &mut df)
            .map_err(|source| MergeError::Persistence { table, source })?;
    }

    Ok(summary)
}

fn merge_transfers<S: TableStore>(
    store: &S,
    feed_id: &str,
    raw: DataFrame,
    stop_map: &DataFrame,
    route_map: &DataFrame,
    trip_map: &DataFrame,
) -> Result<DataFrame, MergeError> {
    log::info!("Collecting transfers.");
    let trip_key_map = registry::key_map(trip_map, "original_trip_id", "trip_id")?;
    let mut lf = raw.lazy();
    for (key_column, out_column, map, map_key, map_id) in [
        ("original_from_stop_id", "from_stop_id", stop_map, "original_stop_id", "stop_id"),
        ("original_to_stop_id", "to_stop_id", stop_map, "original_stop_id", "stop_id"),
        ("original_from_route_id", "from_route_id", route_map, "original_route_id", "route_id"),
        ("original_to_route_id", "to_route_id", route_map, "original_route_id", "route_id"),
        ("original_from_trip_id", "from_trip_id", &trip_key_map, "original_trip_id", "trip_id"),
        ("original_to_trip_id", "to_trip_id", &trip_key_map, "original_trip_id", "trip_id"),
    ] {
        lf = registry::resolve_column(lf, map, map_key, map_id, key_column, out_column)?;
    }
    let fresh = lf
        .with_column(feed_archive::code_label_expr(
            "transfer_type",
            TRANSFER_TYPE_LABELS,
            None,
        ))
        .select([
            col("from_stop_id"),
            col("to_stop_id"),
            col("transfer_type"),
            col("from_route_id"),
            col("to_route_id"),
            col("from_trip_id"),
            col("to_trip_id"),
            col("min_transfer_time"),
        ])
        .collect()?;
    let merged = registry::merge_with_previous(store.load(feed_id, "transfers")?, fresh)?
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    Ok(merged)
}

/// Pairs every feed trip's service key with the trip's surrogate id, in
/// trip-table order, for the calendar expansion.
fn service_trip_pairs(
    trip_services: &DataFrame,
    trip_map: &DataFrame,
) -> PolarsResult<Vec<(String, u32)>> {
    let mut ids: HashMap<&str, u32> = HashMap::with_capacity(trip_map.height());
    let keys = trip_map
        .column("original_trip_id")?
        .as_materialized_series()
        .str()?;
    let values = trip_map.column("trip_id")?.as_materialized_series().u32()?;
    for (key, value) in keys.into_iter().zip(values) {
        if let (Some(key), Some(value)) = (key, value) {
            ids.insert(key, value);
        }
    }

    let services = trip_services
        .column("service_id")?
        .as_materialized_series()
        .str()?;
    let originals = trip_services
        .column("original_trip_id")?
        .as_materialized_series()
        .str()?;
    let mut pairs = Vec::with_capacity(trip_services.height());
    for (service, original) in services.into_iter().zip(originals) {
        let (Some(service), Some(original)) = (service, original) else {
            continue;
        };
        if let Some(id) = ids.get(original) {
            pairs.push((service.to_owned(), *id));
        }
    }
    Ok(pairs)
}
