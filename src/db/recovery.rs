//! Open-time recovery: WAL replay on top of the recovered version state.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use crate::batch::{WriteBatch, BATCH_HEADER_SIZE};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::filenames::{log_file_name, parse_file_name, FileType};
use crate::memtable::MemTable;
use crate::table_cache::TableCache;
use crate::version::edit::VersionEdit;
use crate::version::set::VersionSet;
use crate::wal;

use super::flush::build_table;
use super::InfoLog;

pub(super) struct RecoveredLogs {
    /// Accumulates level-0 files produced while replaying oversized logs.
    pub edit: VersionEdit,
    /// Set when the last WAL was reopened for appending (`reuse_logs`):
    /// the surviving memtable, the writer positioned at the tail, and
    /// the log's file number.
    pub reused: Option<(Arc<MemTable>, wal::Writer, u64)>,
}

/// Replays every WAL at or past the recovered log number, oldest first.
/// Batches re-apply to fresh memtables; a memtable that overflows the
/// write buffer is flushed to level 0 on the spot.
pub(super) fn replay_logs(
    dbpath: &Path,
    options: &Options,
    table_cache: &TableCache,
    versions: &mut VersionSet,
    info_log: &InfoLog,
) -> Result<RecoveredLogs> {
    let min_log = versions.log_number();
    let prev_log = versions.prev_log_number();

    // Every table any live version references must exist before we
    // touch the logs.
    let mut expected = versions.live_files();
    let mut logs: Vec<u64> = Vec::new();
    for entry in fs::read_dir(dbpath)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((file_type, number)) = parse_file_name(name) {
            match file_type {
                FileType::Table => {
                    expected.remove(&number);
                }
                FileType::Log if number >= min_log || number == prev_log => {
                    logs.push(number);
                }
                _ => {}
            }
        }
    }
    if !expected.is_empty() {
        return Err(Error::Corruption(format!(
            "{} missing table files, e.g. {:06}.ldb",
            expected.len(),
            expected.iter().next().expect("non-empty")
        )));
    }

    logs.sort_unstable();

    let mut recovered = RecoveredLogs {
        edit: VersionEdit::new(),
        reused: None,
    };
    let mut max_sequence = 0;

    let log_count = logs.len();
    for (i, &log_number) in logs.iter().enumerate() {
        versions.mark_file_number_used(log_number);
        let last_log = i + 1 == log_count;
        replay_one_log(
            dbpath,
            options,
            table_cache,
            versions,
            info_log,
            log_number,
            last_log,
            &mut max_sequence,
            &mut recovered,
        )?;
    }

    if versions.last_sequence() < max_sequence {
        versions.set_last_sequence(max_sequence);
    }
    Ok(recovered)
}

#[allow(clippy::too_many_arguments)]
fn replay_one_log(
    dbpath: &Path,
    options: &Options,
    table_cache: &TableCache,
    versions: &mut VersionSet,
    info_log: &InfoLog,
    log_number: u64,
    last_log: bool,
    max_sequence: &mut u64,
    recovered: &mut RecoveredLogs,
) -> Result<()> {
    let path = log_file_name(dbpath, log_number);
    let mut reader = wal::Reader::new(File::open(&path)?);

    let mut mem: Option<Arc<MemTable>> = None;
    let mut compactions = 0usize;
    let mut records = 0usize;

    while let Some(record) = reader.read_record()? {
        if record.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("log record too small".to_string()));
        }
        let batch = WriteBatch::from_contents(record)?;
        let target = mem.get_or_insert_with(|| Arc::new(MemTable::new()));
        batch.insert_into(target.as_ref())?;
        records += 1;

        let last_seq = batch.sequence() + batch.count() as u64 - 1;
        if last_seq > *max_sequence {
            *max_sequence = last_seq;
        }

        if target.approximate_memory_usage() > options.write_buffer_size {
            compactions += 1;
            let full = mem.take().expect("memtable present");
            flush_recovered(dbpath, options, table_cache, versions, &full, recovered)?;
        }
    }

    info_log.log(&format!(
        "recovered {records} records from log {log_number:06}"
    ));
    tracing::info!(log = log_number, records, "replayed write-ahead log");

    if options.reuse_logs && last_log && compactions == 0 {
        // Keep appending to this WAL instead of rotating; the recovered
        // memtable stays live.
        let size = fs::metadata(&path)?.len();
        let file = fs::OpenOptions::new().append(true).open(&path)?;
        let writer = wal::Writer::with_offset(file, size);
        let mem = mem.take().unwrap_or_else(|| Arc::new(MemTable::new()));
        tracing::info!(log = log_number, "reusing write-ahead log");
        recovered.reused = Some((mem, writer, log_number));
        return Ok(());
    }

    if let Some(full) = mem.take() {
        if !full.is_empty() {
            flush_recovered(dbpath, options, table_cache, versions, &full, recovered)?;
        }
    }
    Ok(())
}

fn flush_recovered(
    dbpath: &Path,
    options: &Options,
    table_cache: &TableCache,
    versions: &mut VersionSet,
    mem: &Arc<MemTable>,
    recovered: &mut RecoveredLogs,
) -> Result<()> {
    let file_number = versions.new_file_number();
    let mut iter = Arc::clone(mem).iter();
    match build_table(dbpath, options, table_cache, file_number, &mut iter)? {
        Some(meta) => {
            // Recovery always lands at level 0; compaction sorts it out.
            recovered
                .edit
                .add_file(0, meta.number, meta.file_size, meta.smallest, meta.largest);
        }
        None => versions.reuse_file_number(file_number),
    }
    Ok(())
}
