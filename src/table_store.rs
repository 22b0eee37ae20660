use std::fs::File;
use std::path::PathBuf;

use polars::prelude::*;

/// Persistence collaborator for the merge engine: one named columnar table
/// set per feed. The engine assumes exclusive access to a feed's table set
/// for the duration of one merge.
pub trait TableStore {
    fn load(&self, feed_id: &str, table: &str) -> PolarsResult<Option<DataFrame>>;
    fn save(&self, feed_id: &str, table: &str, df: &mut DataFrame) -> PolarsResult<()>;
}

/// Stores each table as `<root>/<feed_id>/<table>.parquet`.
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ParquetStore { root: root.into() }
    }

    fn table_path(&self, feed_id: &str, table: &str) -> PathBuf {
        self.root.join(feed_id).join(format!("{table}.parquet"))
    }
}

impl TableStore for ParquetStore {
    fn load(&self, feed_id: &str, table: &str) -> PolarsResult<Option<DataFrame>> {
        let path = self.table_path(feed_id, table);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(path)?;
        Ok(Some(ParquetReader::new(file).finish()?))
    }

    fn save(&self, feed_id: &str, table: &str, df: &mut DataFrame) -> PolarsResult<()> {
        let dir = self.root.join(feed_id);
        std::fs::create_dir_all(&dir)?;
        let file = File::create(self.table_path(feed_id, table))?;
        ParquetWriter::new(file).finish(df)?;
        Ok(())
    }
}
