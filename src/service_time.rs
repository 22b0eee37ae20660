use polars::prelude::*;

/// Parses a feed time-of-day like `08:15:30` into seconds since the start of
/// the service day. Hours past `24` are valid and denote post-midnight
/// service on the previous service day (`26:05:00` = 93900).
pub fn parse_service_time(text: &str) -> Option<u32> {
    let mut parts = text.trim().splitn(3, ':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Formats seconds since service-day start back into `HH:MM:SS`, keeping
/// hours above 24 for post-midnight times.
pub fn format_service_time(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Converts a string time-of-day column into seconds in place. Values that
/// do not parse become null.
pub fn time_to_seconds_expr(column: &str) -> Expr {
    col(column)
        .map(
            |c| {
                let ca = c.as_materialized_series().str()?;
                let out: UInt32Chunked = ca
                    .into_iter()
                    .map(|opt| opt.and_then(parse_service_time))
                    .collect();
                Ok(Some(out.into_column()))
            },
            GetOutput::from_type(DataType::UInt32),
        )
        .alias(column)
}
