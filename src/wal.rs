use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::limits::MAX_RECORD_LEN;
use crate::model::Event;

/// Length prefix plus trailing checksum around every payload.
const FRAME_OVERHEAD: u64 = 8;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, all
/// little-endian. Returns the number of bytes written.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("log record of {} bytes exceeds limit", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

/// Outcome of reading one frame.
enum Record {
    Event(Event, u64),
    End,
    Torn(&'static str),
}

/// Read until `buf` is full or the input ends. Returns bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    match fill(reader, &mut len_buf)? {
        0 => return Ok(Record::End),
        4 => {}
        _ => return Ok(Record::Torn("truncated length prefix")),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn("record length exceeds limit"));
    }

    let mut payload = vec![0u8; len];
    if fill(reader, &mut payload)? < len {
        return Ok(Record::Torn("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if fill(reader, &mut crc_buf)? < 4 {
        return Ok(Record::Torn("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Torn("checksum mismatch"));
    }
    match bincode::deserialize(&payload) {
        Ok(event) => Ok(Record::Event(event, len as u64 + FRAME_OVERHEAD)),
        Err(_) => Ok(Record::Torn("undecodable payload")),
    }
}

/// Result of scanning a log file from the start.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte offset just past the last intact record.
    pub valid_len: u64,
    /// Why the scan stopped early, if it did.
    pub torn: Option<&'static str>,
}

/// Append-only booking log.
///
/// Only bytes covered by a successful [`flush_sync`](Self::flush_sync) are
/// considered committed. Anything after that point (a crash mid-write, or a
/// batch that failed to write) is cut off before new records go in, so a
/// torn record never hides later ones from replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    synced_len: u64,
    unsynced_len: u64,
    unsynced_appends: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Scan `path` and return every intact event up to the first torn record.
    /// A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match read_record(&mut reader)? {
                Record::Event(event, size) => {
                    replay.events.push(event);
                    replay.valid_len += size;
                }
                Record::End => return Ok(replay),
                Record::Torn(reason) => {
                    replay.torn = Some(reason);
                    return Ok(replay);
                }
            }
        }
    }

    /// Replay `path`, cut any torn tail off the file, and open it for
    /// appending after the last intact record.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Wal::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > replay.valid_len {
            warn!(
                "truncating {} from {on_disk} to {} bytes ({})",
                path.display(),
                replay.valid_len,
                replay.torn.unwrap_or("trailing bytes")
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len: replay.valid_len,
            unsynced_len: 0,
            unsynced_appends: 0,
            appends_since_compact: 0,
        };
        Ok((wal, replay.events))
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. Follow with `flush_sync()` to commit the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.unsynced_len += write_record(&mut self.writer, event)?;
        self.unsynced_appends += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced_len;
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        Ok(())
    }

    /// Discard everything written since the last successful `flush_sync`.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        // into_parts hands back the buffer instead of flushing it
        let (_, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.unsynced_appends);
        self.unsynced_len = 0;
        self.unsynced_appends = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(compact_tmp_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen for append.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        fs::rename(compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

fn compact_tmp_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}
