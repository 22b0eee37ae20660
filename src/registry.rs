//! Surrogate-key assignment shared by every entity table: concatenate the
//! previously persisted rows with the freshly parsed ones, deduplicate by
//! content, and re-enumerate dense ids over the result. Ids are only
//! consistent within the tables written by one merge run, never across runs.

use polars::prelude::*;

/// Appends `fresh` under the previously persisted rows, aligning the previous
/// table to the fresh column set (which drops its stale surrogate column).
/// A missing previous table behaves as an empty one.
pub fn merge_with_previous(
    previous: Option<DataFrame>,
    fresh: DataFrame,
) -> PolarsResult<DataFrame> {
    match previous {
        Some(prev) => {
            let aligned = prev.select(fresh.get_column_names_owned())?;
            aligned.vstack(&fresh)
        }
        None => Ok(fresh),
    }
}

/// Deduplicates by full content (first occurrence wins, order preserved) and
/// assigns a dense surrogate id by row position.
pub fn dedup_and_enumerate(table: DataFrame, id_column: &str) -> PolarsResult<DataFrame> {
    let deduped = table
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    deduped.with_row_index(id_column.into(), None)
}

/// The full registry step: previous + fresh, dedup, enumerate.
pub fn register(
    previous: Option<DataFrame>,
    fresh: DataFrame,
    id_column: &str,
) -> PolarsResult<DataFrame> {
    dedup_and_enumerate(merge_with_previous(previous, fresh)?, id_column)
}

/// Projects a registered table to its natural-key→surrogate-id mapping. When
/// a natural key occurs more than once, the last occurrence wins, so the most
/// recently supplied row's identity resolves dependent lookups.
pub fn key_map(table: &DataFrame, key_column: &str, id_column: &str) -> PolarsResult<DataFrame> {
    table
        .select([key_column, id_column])?
        .lazy()
        .unique_stable(Some(vec![key_column.into()]), UniqueKeepStrategy::Last)
        .collect()
}

/// Left join keeping the left frame's row order.
pub fn left_join(frame: LazyFrame, other: LazyFrame, on: &[&str]) -> LazyFrame {
    let keys: Vec<Expr> = on.iter().map(|name| col(*name)).collect();
    let mut args = JoinArgs::new(JoinType::Left);
    args.maintain_order = MaintainOrderJoin::Left;
    frame.join(other, keys.clone(), keys, args)
}

/// Left join on every listed column, with null keys comparing equal. Used to
/// look rows back up in a registered table by their full content.
pub fn left_join_on_content(frame: LazyFrame, other: LazyFrame, on: &[String]) -> LazyFrame {
    let keys: Vec<Expr> = on.iter().map(|name| col(name.as_str())).collect();
    let mut args = JoinArgs::new(JoinType::Left);
    args.join_nulls = true;
    args.maintain_order = MaintainOrderJoin::Left;
    frame.join(other, keys.clone(), keys, args)
}

/// Adds the surrogate-id column `out_column` to `frame` by looking
/// `frame[key_column]` up in `map` (a `[map_key, map_id]` frame as produced
/// by [`key_map`]). Keys the map does not know yield null ids.
pub fn resolve_column(
    frame: LazyFrame,
    map: &DataFrame,
    map_key: &str,
    map_id: &str,
    key_column: &str,
    out_column: &str,
) -> PolarsResult<LazyFrame> {
    let mut projected = map.select([map_key, map_id])?;
    if map_key != key_column {
        projected.rename(map_key, key_column.into())?;
    }
    if map_id != out_column {
        projected.rename(map_id, out_column.into())?;
    }
    // `rename` leaves the DataFrame's cached schema stale, which `.lazy()`
    // would otherwise pick up and resolve the join against the pre-rename
    // column names.
    projected.clear_schema();
    Ok(left_join(frame, projected.lazy(), &[key_column]))
}
