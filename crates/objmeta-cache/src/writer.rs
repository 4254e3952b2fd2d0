use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::format::CacheHeader;
use crate::merge::{merge_records, MergeStats};
use crate::records::RecordSlice;

/// Replace the cache file at `path` with `header` followed by the merge of
/// `newer` over `older`.
///
/// The file is built in a uniquely named temporary file next to `path` and
/// renamed over it only once fully written. On any error the temporary file
/// is removed and whatever was at `path` is left as it was.
///
/// `wrap` turns the temporary file into the writer the records go through;
/// production code passes `BufWriter::new`.
pub fn write_cache_file<F, W>(
    path: &Path,
    header: &CacheHeader,
    newer: RecordSlice<'_>,
    older: RecordSlice<'_>,
    wrap: F,
) -> CacheResult<MergeStats>
where
    F: FnOnce(File) -> W,
    W: Write,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let prefix = match path.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => return Err(CacheError::InvalidName(path.display().to_string())),
    };
    let temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let stats = {
        let mut out = wrap(temp.as_file().try_clone()?);
        out.write_all(&header.encode())?;
        let stats = merge_records(&mut out, newer, older)?;
        out.flush()?;
        stats
    };
    temp.as_file().sync_all()?;

    debug!(
        temp = %temp.path().display(),
        target = %path.display(),
        records = stats.written,
        "renaming cache file into place"
    );
    temp.persist(path).map_err(|e| CacheError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(stats)
}
