//! The durable, append-only transaction log.
//!
//! Entries live in a sequence of segment files under `<data_dir>/raft_log/`. Every entry must
//! directly [follow](crate::Zxid::follows) the one before it; the log refuses anything else, so
//! it can never contain a gap or a reordering. The log is only ever shortened from the front
//! (compaction behind a durable snapshot) or from the back (dropping entries that never
//! committed).

use failure::{bail, format_err};
use slog::{debug, info, o, warn};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{error, ReplicaConfig, Zxid};

mod entry;
mod segment;

pub use self::entry::LogEntry;
use self::segment::{Record, Segment, SegmentReader};

/// fsync a directory so that file creations, renames and removals in it are durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// The transaction log of one replica.
pub struct TxnLog {
    dir: PathBuf,
    /// Never empty; the last one receives appends.
    segments: Vec<Segment>,
    file: File,
    segment_entries: usize,
    force_sync: bool,
    logger: slog::Logger,
}

impl TxnLog {
    /// Opens (or creates) the log in the replica's log directory.
    ///
    /// Every record is read and verified. A record cut short at the very end of the newest
    /// segment is what a crash in the middle of an append leaves behind; it is trimmed with a
    /// warning. Any other damage, or a discontinuity between entries, is fatal.
    pub fn open(config: &ReplicaConfig) -> Result<Self, failure::Error> {
        let dir = config.log_dir();
        let logger = config.logger.new(o!("component" => "txn_log"));
        fs::create_dir_all(&dir)?;

        let found = segment::list(&dir)?;
        let mut segments: Vec<Segment> = Vec::with_capacity(found.len());
        let count = found.len();
        for (i, (named_prev, path)) in found.into_iter().enumerate() {
            let newest = i + 1 == count;
            let mut reader = match SegmentReader::open(&path)? {
                Some(reader) => reader,
                None if newest => {
                    warn!(logger, "removing segment with torn header"; "file" => %path.display());
                    fs::remove_file(&path)?;
                    sync_dir(&dir)?;
                    continue;
                }
                None => {
                    return Err(error::Recovery::LogCorrupt {
                        file: path.display().to_string(),
                        offset: 0,
                        reason: "truncated header".to_owned(),
                    }
                    .into())
                }
            };

            let prev = reader.prev();
            if prev != named_prev {
                return Err(error::Recovery::LogCorrupt {
                    file: path.display().to_string(),
                    offset: 0,
                    reason: format!("header says it follows {}", prev),
                }
                .into());
            }
            if let Some(before) = segments.last() {
                if before.last != prev {
                    return Err(error::Recovery::LogGapDetected {
                        after: before.last,
                        found: prev,
                    }
                    .into());
                }
            }

            let mut seg = Segment {
                path,
                prev,
                last: prev,
                entries: 0,
                len: segment::HEADER_SIZE,
            };
            loop {
                match reader.next_record()? {
                    Record::Entry(entry, end) => {
                        if !entry.zxid.follows(seg.last) {
                            return Err(error::Recovery::LogGapDetected {
                                after: seg.last,
                                found: entry.zxid,
                            }
                            .into());
                        }
                        seg.last = entry.zxid;
                        seg.entries += 1;
                        seg.len = end;
                    }
                    Record::End => break,
                    Record::Torn(at) if newest => {
                        warn!(logger, "trimming torn record at end of log";
                              "file" => seg.display(), "offset" => at);
                        let file = seg.open_for_append()?;
                        file.set_len(at)?;
                        file.sync_all()?;
                        break;
                    }
                    Record::Torn(at) => {
                        return Err(error::Recovery::LogCorrupt {
                            file: seg.display(),
                            offset: at,
                            reason: "record cut short in a sealed segment".to_owned(),
                        }
                        .into())
                    }
                }
            }
            segments.push(seg);
        }

        if segments.is_empty() {
            segments.push(Segment::create(&dir, Zxid::ZERO)?);
        }
        let file = segments[segments.len() - 1].open_for_append()?;

        let log = TxnLog {
            dir,
            segments,
            file,
            segment_entries: config.log_segment_entries,
            force_sync: config.force_sync,
            logger,
        };
        info!(log.logger, "opened transaction log";
              "segments" => log.segments.len(), "base" => %log.base(), "last" => %log.last_zxid());
        Ok(log)
    }

    /// The last entry in the log, or [`base`](TxnLog::base) if there is none.
    pub fn last_zxid(&self) -> Zxid {
        self.active().last
    }

    /// The zxid the retained part of the log continues from. Everything up to here has been
    /// compacted away (or never existed).
    pub fn base(&self) -> Zxid {
        self.segments[0].prev
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.entries).sum()
    }

    /// True if no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn active(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// Durably appends an entry. It must directly follow [`last_zxid`](TxnLog::last_zxid).
    ///
    /// When this returns `Ok` the entry is on disk (and fsynced, if `force_sync` is set).
    pub fn append(&mut self, entry: &LogEntry) -> Result<(), failure::Error> {
        let last = self.last_zxid();
        if !entry.zxid.follows(last) {
            return Err(error::Commit::OutOfOrder {
                last,
                got: entry.zxid,
            }
            .into());
        }

        self.write_record(entry).map_err(|e| {
            warn!(self.logger, "append failed"; "zxid" => %entry.zxid, "error" => %e);
            if let Err(e) = self.discard_partial_write() {
                warn!(self.logger, "could not discard partial record"; "error" => %e);
            }
            failure::Error::from(error::Commit::LogAppendFailure {
                zxid: entry.zxid,
                reason: e.to_string(),
            })
        })
    }

    /// Flushes appended entries to disk. Only needed when `force_sync` is off.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn write_record(&mut self, entry: &LogEntry) -> io::Result<()> {
        if self.active().entries >= self.segment_entries {
            self.rotate()?;
        }

        let record = segment::encode_record(entry)?;
        self.file.write_all(&record)?;
        self.file.flush()?;
        if self.force_sync {
            self.file.sync_data()?;
        }

        let n = self.segments.len();
        let active = &mut self.segments[n - 1];
        active.last = entry.zxid;
        active.entries += 1;
        active.len += record.len() as u64;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.sync_all()?;
        let seg = Segment::create(&self.dir, self.last_zxid())?;
        debug!(self.logger, "rolled over to new segment"; "file" => seg.display());
        self.file = seg.open_for_append()?;
        self.segments.push(seg);
        Ok(())
    }

    fn discard_partial_write(&mut self) -> io::Result<()> {
        let active = self.active();
        let file = active.open_for_append()?;
        file.set_len(active.len)?;
        file.sync_all()?;
        self.file = file;
        Ok(())
    }

    /// Lazily reads every retained entry with a zxid of at least `from`, in order.
    ///
    /// The reader only covers entries that were present when it was created.
    pub fn read_from(&self, from: Zxid) -> LogReader {
        LogReader {
            pending: self
                .segments
                .iter()
                .filter(|s| s.entries > 0 && s.last >= from)
                .map(|s| s.path.clone())
                .collect::<Vec<_>>()
                .into_iter(),
            current: None,
            from,
            upto: self.last_zxid(),
            done: false,
        }
    }

    /// Drops every entry after `zxid`. Used for entries that were appended but never committed.
    pub fn truncate_after(&mut self, zxid: Zxid) -> Result<(), failure::Error> {
        if zxid >= self.last_zxid() {
            return Ok(());
        }
        if zxid < self.base() {
            bail!(
                "cannot truncate to {}: log has been compacted up to {}",
                zxid,
                self.base()
            );
        }

        let keep = self
            .segments
            .iter()
            .position(|s| s.last >= zxid)
            .unwrap_or(self.segments.len() - 1);
        for seg in self.segments.drain(keep + 1..) {
            fs::remove_file(&seg.path)?;
        }

        let seg = &mut self.segments[keep];
        let mut reader = SegmentReader::open(&seg.path)?
            .ok_or_else(|| format_err!("segment {} lost its header", seg.display()))?;
        let mut end = segment::HEADER_SIZE;
        let mut entries = 0;
        while let Record::Entry(entry, next) = reader.next_record()? {
            if entry.zxid > zxid {
                break;
            }
            end = next;
            entries += 1;
        }

        let file = seg.open_for_append()?;
        file.set_len(end)?;
        file.sync_all()?;
        sync_dir(&self.dir)?;
        seg.last = zxid;
        seg.entries = entries;
        seg.len = end;
        self.file = file;

        info!(self.logger, "truncated log"; "last" => %zxid);
        Ok(())
    }

    /// Deletes whole segments whose entries are all at or before `upto`. The newest segment is
    /// always kept. Returns the number of segments removed.
    pub fn compact(&mut self, upto: Zxid) -> Result<usize, failure::Error> {
        let mut removable = 0;
        while removable + 1 < self.segments.len() && self.segments[removable + 1].prev <= upto {
            removable += 1;
        }
        if removable == 0 {
            return Ok(0);
        }
        for seg in self.segments.drain(..removable) {
            fs::remove_file(&seg.path)?;
        }
        sync_dir(&self.dir)?;
        debug!(self.logger, "compacted log"; "upto" => %upto, "segments" => removable, "base" => %self.base());
        Ok(removable)
    }

    /// Throws the whole log away and restarts it right after `base`, as after installing a
    /// snapshot taken at `base`.
    pub fn reset(&mut self, base: Zxid) -> Result<(), failure::Error> {
        // the fresh segment may reuse the name of an existing one
        for seg in self.segments.drain(..) {
            fs::remove_file(&seg.path)?;
        }
        let seg = Segment::create(&self.dir, base)?;
        self.file = seg.open_for_append()?;
        self.segments.push(seg);
        info!(self.logger, "reset log"; "base" => %base);
        Ok(())
    }
}

#[cfg(test)]
impl TxnLog {
    /// Swaps the append handle for a read-only one, so the next write fails.
    pub(crate) fn fail_next_append(&mut self) -> io::Result<()> {
        self.file = File::open(&self.active().path)?;
        Ok(())
    }

    pub(crate) fn active_path(&self) -> &Path {
        &self.active().path
    }
}

/// Iterator returned by [`TxnLog::read_from`].
pub struct LogReader {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<SegmentReader>,
    from: Zxid,
    upto: Zxid,
    done: bool,
}

impl LogReader {
    fn advance(&mut self) -> Result<Option<LogEntry>, failure::Error> {
        loop {
            if self.current.is_none() {
                let path = match self.pending.next() {
                    Some(path) => path,
                    None => return Ok(None),
                };
                self.current = Some(SegmentReader::open(&path)?.ok_or_else(|| {
                    format_err!("segment {} lost its header", path.display())
                })?);
            }
            let reader = match self.current.as_mut() {
                Some(reader) => reader,
                None => return Ok(None),
            };

            match reader.next_record()? {
                Record::Entry(entry, _) if entry.zxid > self.upto => return Ok(None),
                Record::Entry(entry, _) if entry.zxid < self.from => continue,
                Record::Entry(entry, _) => return Ok(Some(entry)),
                Record::End => self.current = None,
                Record::Torn(at) => bail!("log record at offset {} is incomplete", at),
            }
        }
    }
}

impl Iterator for LogReader {
    type Item = Result<LogEntry, failure::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
