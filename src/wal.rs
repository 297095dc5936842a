use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::model::Event;

/// Entries larger than this are treated as corruption.
const MAX_ENTRY_LEN: usize = 1 << 20;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append events to the log at `path` (created if missing) and fsync.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`.
/// The file is opened per call so a log replaced on disk is never written
/// through a stale descriptor.
pub fn append(path: &Path, events: &[Event]) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for event in events {
        encode_event(&mut writer, event)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Replace the log with `events`: write a temp file, fsync, rename over.
pub fn rewrite(path: &Path, events: &[Event]) -> io::Result<()> {
    let tmp_path = path.with_extension("log.tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

/// Outcome of reading a log back.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A truncated or corrupt tail was discarded.
    pub discarded_tail: bool,
}

/// Replay the log from disk, returning all valid events.
/// A missing file is an empty log; replay stops at the first truncated or corrupt entry.
pub fn replay(path: &Path) -> io::Result<Replay> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut out = Replay::default();

    loop {
        let mut len_buf = [0u8; 4];
        match read_full(&mut reader, &mut len_buf)? {
            Fill::Full => {}
            Fill::Empty => break,
            Fill::Partial => {
                out.discarded_tail = true;
                break;
            }
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_LEN {
            out.discarded_tail = true;
            break;
        }

        let mut payload = vec![0u8; len];
        let mut crc_buf = [0u8; 4];
        if read_full(&mut reader, &mut payload)? != Fill::Full
            || read_full(&mut reader, &mut crc_buf)? != Fill::Full
        {
            out.discarded_tail = true;
            break;
        }

        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            out.discarded_tail = true;
            break;
        }
        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => out.events.push(event),
            Err(_) => {
                out.discarded_tail = true;
                break;
            }
        }
    }

    Ok(out)
}

#[derive(Debug, PartialEq, Eq)]
enum Fill {
    Full,
    /// Clean end of file before any byte.
    Empty,
    Partial,
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(match filled {
        n if n == buf.len() => Fill::Full,
        0 => Fill::Empty,
        _ => Fill::Partial,
    })
}
