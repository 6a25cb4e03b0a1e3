use std::path::Path;

use crate::env::Env;
use crate::error::Result;
use crate::filename::table_file_name;
use crate::iterator::BoxedIterator;
use crate::options::ReadOptions;
use crate::sstable::{TableBuilder, TableOptions};
use crate::table_cache::TableCache;
use crate::types::InternalKey;
use crate::version::FileMetaData;

/// Write every entry of `iter` to table file `number`. Returns `None`, and
/// leaves no file behind, when the iterator is empty.
///
/// The new table is opened through `table_cache` before returning, so a
/// table that cannot be read back is never reported as built.
pub(crate) fn build_table(
    dbname: &Path,
    env: &dyn Env,
    table_cache: &TableCache,
    options: TableOptions,
    mut iter: BoxedIterator,
    number: u64,
) -> Result<Option<FileMetaData>> {
    iter.seek_to_first()?;
    if !iter.is_valid() {
        return Ok(None);
    }

    let path = table_file_name(dbname, number);
    let result = (|| -> Result<FileMetaData> {
        let file = env.new_writable_file(&path)?;
        let mut builder = TableBuilder::new(options, file);
        let smallest = InternalKey::decode_from(iter.key());
        let mut last_key = Vec::new();
        while iter.is_valid() {
            last_key.clear();
            last_key.extend_from_slice(iter.key());
            builder.add(iter.key(), iter.value())?;
            iter.next()?;
        }
        let file_size = builder.finish()?;

        let mut check = table_cache.new_iterator(&ReadOptions::default(), number, file_size);
        check.seek_to_first()?;
        Ok(FileMetaData::new(
            number,
            file_size,
            smallest,
            InternalKey::decode_from(&last_key),
        ))
    })();

    if result.is_err() {
        let _ = env.remove_file(&path);
    }
    result.map(Some)
}
