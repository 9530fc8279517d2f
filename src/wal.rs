use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Outcome of reading one frame during replay.
enum Frame {
    /// A decoded event and the frame's size on disk.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Truncated or corrupt frame; everything from here on is discarded.
    Torn(&'static str),
}

/// Fill as much of `buf` as the reader still has; returns the bytes read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// `read_exact` that reports a short read as `None` instead of an error.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    Ok((read_up_to(reader, buf)? == buf.len()).then_some(()))
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match read_up_to(reader, &mut len_buf)? {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Torn("truncated length")),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(Frame::Torn("oversized frame"));
    }

    let mut payload = vec![0u8; len];
    if read_or_eof(reader, &mut payload)?.is_none() {
        return Ok(Frame::Torn("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if read_or_eof(reader, &mut crc_buf)?.is_none() {
        return Ok(Frame::Torn("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Frame::Event(event, 8 + len as u64)),
        Err(_) => Ok(Frame::Torn("undecodable payload")),
    }
}

/// Append-only write-ahead log of claim and resource events.
///
/// Each entry is `[u32: len][bincode: Event][u32: crc32]`, where `len` counts
/// the payload only. A torn tail left by a crash is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Production code batches with
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a compacted log next to `path` and fsync it. Slow; no swap yet.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every intact event from disk. A missing file replays as empty.
    /// A torn tail is cut off so later appends land after the last good frame.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut good_len = 0u64;
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event, size) => {
                    events.push(event);
                    good_len += size;
                }
                Frame::End => break,
                Frame::Torn(reason) => {
                    tracing::warn!(
                        "WAL {}: discarding tail after {} events ({reason})",
                        path.display(),
                        events.len()
                    );
                    OpenOptions::new().write(true).open(path)?.set_len(good_len)?;
                    break;
                }
            }
        }
        Ok(events)
    }
}
