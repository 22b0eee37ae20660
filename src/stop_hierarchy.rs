use std::collections::HashSet;

use polars::functions::concat_df_diagonal;
use polars::prelude::*;

use crate::registry;

/// The merged stop table plus its natural-key→surrogate-id map, shared with
/// the stages that reference stops.
pub struct ResolvedStops {
    pub stops: DataFrame,
    pub stop_map: DataFrame,
}

/// Merges freshly parsed stops into the persisted stop table and resolves
/// parent-station references to surrogate ids.
///
/// A feed update may relist a leaf stop without its already-known parent
/// station, and may relist a parent without its unchanged children. The union
/// therefore keeps every previous row, and stops from the new snapshot whose
/// parent was re-added are pulled in again so their parent reference can be
/// re-resolved. The pull runs exactly twice, which covers grandparent chains.
pub fn resolve_stops(
    previous: Option<DataFrame>,
    fresh: DataFrame,
) -> PolarsResult<ResolvedStops> {
    let had_previous = previous.is_some();
    let unioned = match previous {
        Some(prev) => concat_df_diagonal(&[prev, fresh.clone()])?,
        None => fresh
            .clone()
            .lazy()
            .with_column(
                lit(NULL)
                    .cast(DataType::UInt32)
                    .alias("parent_station_id"),
            )
            .collect()?,
    };

    // Content identity excludes both surrogate columns, so a stop whose only
    // change is a newly resolved parent still matches its prior row.
    let content_columns: Vec<PlSmallStr> = unioned
        .get_column_names()
        .into_iter()
        .filter(|name| name.as_str() != "stop_id" && name.as_str() != "parent_station_id")
        .map(|name| name.clone())
        .collect();
    let mut unioned = unioned
        .lazy()
        .unique_stable(Some(content_columns), UniqueKeepStrategy::First)
        .collect()?;

    if had_previous {
        for _ in 0..2 {
            unioned = pull_children_of_added_stops(unioned, &fresh)?;
        }
    }

    let unioned = drop_if_present(unioned, "stop_id")?;
    let stops = unioned.with_row_index("stop_id".into(), None)?;
    let stop_map = registry::key_map(&stops, "original_stop_id", "stop_id")?;

    // Rows carried over from the previous table keep their resolved parent;
    // everything else resolves through the map, null where no stop matches.
    let joined_debug = registry::resolve_column(
        stops.clone().lazy(),
        &stop_map,
        "original_stop_id",
        "stop_id",
        "original_parent_station_id",
        "resolved_parent_id",
    )?
    .collect();
    eprintln!("DEBUG joined_debug: {:?}", joined_debug);
    let stops = registry::resolve_column(
        stops.lazy(),
        &stop_map,
        "original_stop_id",
        "stop_id",
        "original_parent_station_id",
        "resolved_parent_id",
    )?
    .with_column(
        when(col("parent_station_id").is_null())
            .then(col("resolved_parent_id"))
            .otherwise(col("parent_station_id"))
            .alias("parent_station_id"),
    )
    .collect()?
    .drop("resolved_parent_id")?;

    Ok(ResolvedStops { stops, stop_map })
}

/// Appends the new-snapshot stops that deduplicated away against a previous
/// row but whose parent station was re-added, so that their parent reference
/// is re-resolved against the updated parent.
fn pull_children_of_added_stops(unioned: DataFrame, fresh: &DataFrame) -> PolarsResult<DataFrame> {
    let added_mask = unioned
        .column("stop_id")?
        .as_materialized_series()
        .is_null();
    let added_rows = unioned.filter(&added_mask)?;
    let added: HashSet<String> = added_rows
        .column("original_stop_id")?
        .as_materialized_series()
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_owned)
        .collect();

    let own_keys = fresh
        .column("original_stop_id")?
        .as_materialized_series()
        .str()?;
    let parent_keys = fresh
        .column("original_parent_station_id")?
        .as_materialized_series()
        .str()?;
    let to_pull: BooleanChunked = own_keys
        .into_iter()
        .zip(parent_keys)
        .map(|(own, parent)| {
            let own_added = own.is_some_and(|key| added.contains(key));
            let parent_added = parent.is_some_and(|key| added.contains(key));
            Some(!own_added && parent_added)
        })
        .collect();

    let pulled = fresh.filter(&to_pull)?;
    if pulled.height() == 0 {
        return Ok(unioned);
    }
    concat_df_diagonal(&[unioned, pulled])
}

fn drop_if_present(df: DataFrame, column: &str) -> PolarsResult<DataFrame> {
    if df.get_column_names().iter().any(|name| name.as_str() == column) {
        df.drop(column)
    } else {
        Ok(df)
    }
}
