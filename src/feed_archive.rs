use std::collections::HashSet;
use std::io::{Cursor, Read};

use polars::prelude::*;
use ::zip::ZipArchive;

use crate::error::MergeError;

/// A feed snapshot archive. Tables are looked up by logical name, tolerating
/// path prefixes inside the archive (`gtfs/stops.txt` matches `stops`).
pub struct FeedArchive {
    zip: ZipArchive<Cursor<Vec<u8>>>,
}

impl FeedArchive {
    pub fn open(bytes: &[u8]) -> Result<Self, MergeError> {
        let zip = ZipArchive::new(Cursor::new(bytes.to_vec()))?;
        Ok(FeedArchive { zip })
    }

    /// Returns the raw bytes of `<name>.txt`, or `None` when the archive has
    /// no entry with that file name at any path.
    pub fn table_bytes(&mut self, name: &str) -> Result<Option<Vec<u8>>, MergeError> {
        let file_name = format!("{name}.txt");
        let entry = self
            .zip
            .file_names()
            .find(|n| *n == file_name || n.ends_with(&format!("/{file_name}")))
            .map(str::to_owned);
        let Some(entry) = entry else {
            return Ok(None);
        };
        let mut file = self.zip.by_name(&entry)?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(::zip::result::ZipError::Io)?;
        Ok(Some(bytes))
    }
}

/// How one feed column is parsed: the dtype it is read as, whether the table
/// is unusable without it, and what to synthesize when the feed omits it.
pub struct FieldSpec {
    pub name: &'static str,
    /// Column name in the normalized frame.
    pub out: &'static str,
    pub dtype: DataType,
    pub required: bool,
    /// Literal for a synthesized column; `None` synthesizes null.
    pub default: Option<&'static str>,
}

pub struct TableSpec {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

const fn required(name: &'static str, out: &'static str, dtype: DataType) -> FieldSpec {
    FieldSpec {
        name,
        out,
        dtype,
        required: true,
        default: None,
    }
}

const fn optional(name: &'static str, out: &'static str, dtype: DataType) -> FieldSpec {
    FieldSpec {
        name,
        out,
        dtype,
        required: false,
        default: None,
    }
}

pub static AGENCY_SPEC: TableSpec = TableSpec {
    name: "agency",
    fields: &[
        required("agency_name", "agency_name", DataType::String),
        FieldSpec {
            name: "agency_id",
            out: "original_agency_id",
            dtype: DataType::String,
            required: false,
            default: Some("default"),
        },
    ],
};

pub static ROUTES_SPEC: TableSpec = TableSpec {
    name: "routes",
    fields: &[
        required("route_id", "original_route_id", DataType::String),
        required("route_type", "route_type", DataType::Int64),
        optional("agency_id", "original_agency_id", DataType::String),
        optional("route_short_name", "route_short_name", DataType::String),
        optional("route_long_name", "route_long_name", DataType::String),
        optional("route_color", "route_color", DataType::String),
        optional("route_text_color", "route_text_color", DataType::String),
        optional("route_sort_order", "route_sort_order", DataType::UInt32),
        optional("network_id", "network_id", DataType::String),
    ],
};

pub static STOPS_SPEC: TableSpec = TableSpec {
    name: "stops",
    fields: &[
        required("stop_id", "original_stop_id", DataType::String),
        required("stop_name", "stop_name", DataType::String),
        required("stop_lat", "stop_lat", DataType::Float64),
        required("stop_lon", "stop_lon", DataType::Float64),
        optional("location_type", "location_type", DataType::Int64),
        optional("parent_station", "original_parent_station_id", DataType::String),
    ],
};

pub static STOP_TIMES_SPEC: TableSpec = TableSpec {
    name: "stop_times",
    fields: &[
        required("trip_id", "original_trip_id", DataType::String),
        required("arrival_time", "arrival_time", DataType::String),
        required("departure_time", "departure_time", DataType::String),
        required("stop_id", "original_stop_id", DataType::String),
        required("stop_sequence", "stop_sequence", DataType::UInt32),
        optional("pickup_type", "pickup_type", DataType::Int64),
        optional("drop_off_type", "drop_off_type", DataType::Int64),
    ],
};

pub static TRIPS_SPEC: TableSpec = TableSpec {
    name: "trips",
    fields: &[
        required("route_id", "original_route_id", DataType::String),
        required("service_id", "service_id", DataType::String),
        required("trip_id", "original_trip_id", DataType::String),
        optional("trip_headsign", "trip_headsign", DataType::String),
        optional("trip_short_name", "trip_short_name", DataType::String),
        optional("direction_id", "direction_id", DataType::Int64),
        optional("bikes_allowed", "bikes_allowed", DataType::Int64),
    ],
};

pub static TRANSFERS_SPEC: TableSpec = TableSpec {
    name: "transfers",
    fields: &[
        required("from_stop_id", "original_from_stop_id", DataType::String),
        required("to_stop_id", "original_to_stop_id", DataType::String),
        required("transfer_type", "transfer_type", DataType::Int64),
        optional("from_route_id", "original_from_route_id", DataType::String),
        optional("to_route_id", "original_to_route_id", DataType::String),
        optional("from_trip_id", "original_from_trip_id", DataType::String),
        optional("to_trip_id", "original_to_trip_id", DataType::String),
        optional("min_transfer_time", "min_transfer_time", DataType::UInt32),
    ],
};

pub static CALENDAR_SPEC: TableSpec = TableSpec {
    name: "calendar",
    fields: &[
        required("service_id", "service_id", DataType::String),
        required("monday", "monday", DataType::Int64),
        required("tuesday", "tuesday", DataType::Int64),
        required("wednesday", "wednesday", DataType::Int64),
        required("thursday", "thursday", DataType::Int64),
        required("friday", "friday", DataType::Int64),
        required("saturday", "saturday", DataType::Int64),
        required("sunday", "sunday", DataType::Int64),
        required("start_date", "start_date", DataType::String),
        required("end_date", "end_date", DataType::String),
    ],
};

pub static CALENDAR_DATES_SPEC: TableSpec = TableSpec {
    name: "calendar_dates",
    fields: &[
        required("service_id", "service_id", DataType::String),
        required("date", "date", DataType::String),
        required("exception_type", "exception_type", DataType::Int64),
    ],
};

// https://developers.google.com/transit/gtfs/reference/extended-route-types
pub static ROUTE_TYPE_LABELS: &[(i64, &str)] = &[
    (0, "tram"),
    (1, "metro"),
    (2, "rail"),
    (3, "bus"),
    (4, "ferry"),
    (5, "cable_tram"),
    (6, "aerial_lift"),
    (7, "funicular"),
    (11, "trolleybus"),
    (12, "monorail"),
    (100, "railway_service"),
    (101, "hsr"),
    (102, "long_distance_rail"),
    (103, "inter_regional_rail"),
    (105, "sleeper_rail"),
    (106, "regional_rail"),
    (107, "tourist_railway"),
    (108, "rail_shuttle"),
    (109, "suburban_railway"),
    (200, "coach_service"),
    (201, "international_coach"),
    (202, "national_coach"),
    (203, "shuttle_coach"),
    (204, "regional_coach"),
    (400, "urban_railway_service"),
    (401, "metro_service"),
    (402, "underground"),
    (403, "urban_railway"),
    (405, "monorail_service"),
    (700, "bus_service"),
    (701, "regional_bus"),
    (702, "express_bus"),
    (703, "stopping_bus"),
    (704, "local_bus"),
    (705, "night_bus"),
    (706, "post_bus"),
    (712, "school_bus"),
    (715, "demand_and_response_bus"),
    (800, "trolleybus_service"),
    (900, "tram_service"),
    (901, "city_tram"),
    (902, "local_tram"),
    (903, "regional_tram"),
    (904, "sightseeing_tram"),
    (905, "shuttle_tram"),
    (1000, "water_transport_service"),
    (1100, "air_service"),
    (1200, "ferry_service"),
    (1300, "aerial_lift_service"),
    (1301, "telecabin"),
    (1400, "funicular_service"),
    (1500, "taxi_service"),
    (1501, "communal_service"),
    (1700, "miscellaneous_service"),
    (1702, "horse-drawn_carriage"),
];

pub static LOCATION_TYPE_LABELS: &[(i64, &str)] = &[
    (0, "stop"),
    (1, "station"),
    (2, "entrance/exit"),
    (3, "generic_node"),
    (4, "boarding_area"),
];

pub static PICKUP_DROP_OFF_LABELS: &[(i64, &str)] = &[
    (0, "allowed"),
    (1, "forbidden"),
    (2, "must_phone"),
    (3, "must_coordinate"),
];

pub static BIKES_ALLOWED_LABELS: &[(i64, &str)] = &[(0, "unknown"), (1, "yes"), (2, "no")];

pub static TRANSFER_TYPE_LABELS: &[(i64, &str)] = &[
    (0, "recommended_transfer"),
    (1, "timed_transfer"),
    (2, "minimum_time"),
    (3, "unfeasible_transfer"),
    (4, "sequential_trips_in-seat_transfer"),
    (5, "sequential_trips_alight_transfer"),
];

/// Reads and normalizes a table, or `None` when the archive lacks it.
pub fn read_table(
    archive: &mut FeedArchive,
    spec: &TableSpec,
) -> Result<Option<DataFrame>, MergeError> {
    let Some(bytes) = archive.table_bytes(spec.name)? else {
        return Ok(None);
    };
    let df = parse_table(bytes, spec)?;
    Ok(Some(df))
}

/// Like [`read_table`], but absence is a hard failure for the snapshot.
pub fn require_table(
    archive: &mut FeedArchive,
    spec: &'static TableSpec,
) -> Result<DataFrame, MergeError> {
    read_table(archive, spec)?.ok_or(MergeError::MissingRequiredTable { table: spec.name })
}

fn parse_table(bytes: Vec<u8>, spec: &TableSpec) -> PolarsResult<DataFrame> {
    // Everything is read as text; the field spec decides each column's dtype
    // in one pass below.
    let raw = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;

    let present: HashSet<&str> = raw
        .get_column_names()
        .into_iter()
        .map(|n| n.as_str())
        .collect();
    let mut columns = Vec::with_capacity(spec.fields.len());
    for field in spec.fields {
        if present.contains(field.name) {
            columns.push(col(field.name).cast(field.dtype.clone()).alias(field.out));
        } else if field.required {
            return Err(PolarsError::ColumnNotFound(
                format!("`{}` in table `{}`", field.name, spec.name).into(),
            ));
        } else {
            let value = match field.default {
                Some(text) => lit(text),
                None => lit(NULL),
            };
            columns.push(value.cast(field.dtype.clone()).alias(field.out));
        }
    }
    raw.lazy().select(columns).collect()
}

/// Maps an integer code column to its label, in place. Unknown codes become
/// null; null codes become `missing` (or stay null).
pub fn code_label_expr(
    column: &str,
    labels: &'static [(i64, &str)],
    missing: Option<&'static str>,
) -> Expr {
    col(column)
        .map(
            move |c| {
                let ca = c.as_materialized_series().i64()?;
                let out: StringChunked = ca
                    .into_iter()
                    .map(|opt| match opt {
                        Some(code) => labels
                            .iter()
                            .find(|(candidate, _)| *candidate == code)
                            .map(|(_, label)| *label),
                        None => missing,
                    })
                    .collect();
                Ok(Some(out.into_column()))
            },
            GetOutput::from_type(DataType::String),
        )
        .alias(column)
}

/// Maps a 0/1 direction code to a flag; any other code becomes null.
pub fn direction_flag_expr(column: &str) -> Expr {
    col(column)
        .map(
            |c| {
                let ca = c.as_materialized_series().i64()?;
                let out: BooleanChunked = ca
                    .into_iter()
                    .map(|opt| {
                        opt.and_then(|code| match code {
                            0 => Some(false),
                            1 => Some(true),
                            _ => None,
                        })
                    })
                    .collect();
                Ok(Some(out.into_column()))
            },
            GetOutput::from_type(DataType::Boolean),
        )
        .alias(column)
}
