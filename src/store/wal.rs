use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

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

/// Records longer than this are treated as a torn length prefix.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Read exactly `buf.len()` bytes. `Ok(false)` means the log ended mid-record.
fn read_record_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Why replay stopped before the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Torn {
    Truncated,
    Oversized,
    Checksum,
    Undecodable,
}

/// Next intact event, `Ok(None)` at a clean end, `Err(Torn)` at a damaged tail.
fn next_event(reader: &mut impl Read) -> io::Result<Result<Option<Event>, Torn>> {
    let mut len_buf = [0u8; 4];
    match reader.read(&mut len_buf[..1])? {
        0 => return Ok(Ok(None)),
        _ => {
            if !read_record_part(reader, &mut len_buf[1..])? {
                return Ok(Err(Torn::Truncated));
            }
        }
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Err(Torn::Oversized));
    }

    let mut record = vec![0u8; len + 4];
    if !read_record_part(reader, &mut record)? {
        return Ok(Err(Torn::Truncated));
    }
    let (payload, crc) = record.split_at(len);
    let crc = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if crc != crc32fast::hash(payload) {
        return Ok(Err(Torn::Checksum));
    }
    Ok(bincode::deserialize(payload).map(Some).map_err(|_| Torn::Undecodable))
}

/// Append-only log of document mutations.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`.
/// A truncated or corrupt tail (crash mid-write) is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing; follow with `flush_sync()` for the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
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

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the log, returning every intact event in write order.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        loop {
            match next_event(&mut reader)? {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break,
                Err(torn) => {
                    tracing::warn!(path = %path.display(), ?torn, kept = events.len(), "damaged WAL tail dropped");
                    break;
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserProfile;
    use crate::model::{Area, Booking, Supervisor, Visit, Visitor, VisitorContact};
    use crate::store::{BookingFilter, InMemoryStore, VisitFilter};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("checkin_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn area(id: &str) -> Event {
        Event::AreaUpserted(Area {
            id: id.into(),
            name: "Room".into(),
            capacity: 4,
            ..Default::default()
        })
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            area("a1"),
            Event::BookingsDeleted { ids: vec![Ulid::new()] },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = area("a1");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let payload = bincode::serialize(&Event::VisitAccepted { id: Ulid::new() }).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_log_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..20 {
                wal.append(&Event::BookingsDeleted { ids: vec![Ulid::new()] }).unwrap();
            }
            wal.append(&area("a1")).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let next = area("a2");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&[area("a1")]).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&next).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![area("a1"), next]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|i| area(&format!("a{i}"))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn booking(user: &str, d: u32) -> Booking {
        Booking {
            id: Ulid::new(),
            user: user.into(),
            user_name: format!("{user}@example.org"),
            area: "a1".into(),
            date: day(d),
            area_data: Area::default(),
        }
    }

    fn visit(host: &str, d: u32) -> Visit {
        Visit {
            id: Ulid::new(),
            visitor: Visitor::from_contact(
                VisitorContact {
                    first_name: "Grace".into(),
                    email: "grace@navy.mil".into(),
                    ..Default::default()
                },
                host,
            ),
            date: day(d),
            additional_info: String::new(),
            needs_parking_space: false,
            user: host.into(),
            supervisor: Supervisor::default(),
            has_accepted: false,
        }
    }

    fn write_all(path: &Path, events: &[Event]) {
        let mut wal = Wal::open(path).unwrap();
        for e in events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
    }

    /// One office day: setup, check-ins, a visit that gets accepted, a
    /// cancellation and the nightly sweep.
    fn office_day() -> (Vec<Event>, Booking, Visit) {
        let kept = booking("u1", 10);
        let cancelled = booking("u2", 10);
        let swept = booking("u3", 2);
        let guest = visit("u1", 10);
        let old_visit = visit("u2", 3);
        let events = vec![
            area("a1"),
            Event::SettingsReplaced { location_managers: vec!["boss@example.org".into()] },
            Event::ProfileUpserted {
                user_id: "u1".into(),
                profile: UserProfile {
                    first_name: "Alice".into(),
                    last_name: "Smith".into(),
                    email: "alice@example.org".into(),
                },
            },
            Event::BookingInserted(swept.clone()),
            Event::VisitInserted(old_visit.clone()),
            Event::BookingInserted(kept.clone()),
            Event::BookingInserted(cancelled.clone()),
            Event::VisitInserted(guest.clone()),
            Event::VisitAccepted { id: guest.id },
            Event::BookingsDeleted { ids: vec![cancelled.id] },
            Event::VisitorAdded(guest.visitor.clone()),
            Event::BookingsDeleted { ids: vec![swept.id] },
            Event::VisitsDeleted { ids: vec![old_visit.id] },
        ];
        (events, kept, guest)
    }

    #[test]
    fn office_day_replays_to_final_state() {
        let path = tmp_path("office_day.wal");
        let (events, kept, guest) = office_day();
        write_all(&path, &events);

        let state = InMemoryStore::new();
        for e in Wal::replay(&path).unwrap() {
            state.apply_event(&e);
        }
        assert_eq!(state.find_bookings(&BookingFilter::default()), vec![kept]);
        let visits = state.find_visits(&VisitFilter::default());
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].id, guest.id);
        assert!(visits[0].has_accepted);
        assert_eq!(state.location_managers(), vec!["boss@example.org".to_string()]);
        assert_eq!(state.profile("u1").unwrap().first_name, "Alice");
        assert_eq!(state.visitor(&guest.visitor.id), Some(guest.visitor));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn crash_while_writing_a_cancellation_keeps_the_booking() {
        let path = tmp_path("torn_cancel.wal");
        let b = booking("u1", 10);
        write_all(&path, &[area("a1"), Event::BookingInserted(b.clone())]);
        let intact = fs::metadata(&path).unwrap().len();
        write_all(&path, &[Event::BookingsDeleted { ids: vec![b.id] }]);

        // Lose the last three bytes of the cancellation record.
        let full = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(full - 3).unwrap();
        assert!(full - 3 > intact);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![area("a1"), Event::BookingInserted(b)]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn garbage_length_prefix_ends_replay() {
        let path = tmp_path("oversized.wal");
        let first = Event::VisitAccepted { id: Ulid::new() };
        write_all(&path, &[first.clone()]);
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compacted_office_day_matches_full_replay() {
        let path = tmp_path("office_day_compact.wal");
        let (events, _, _) = office_day();
        write_all(&path, &events);

        let full = InMemoryStore::new();
        for e in Wal::replay(&path).unwrap() {
            full.apply_event(&e);
        }
        let snapshot = full.snapshot_events();
        assert!(snapshot.len() < events.len());
        Wal::open(&path).unwrap().compact(&snapshot).unwrap();

        let compacted = InMemoryStore::new();
        for e in Wal::replay(&path).unwrap() {
            compacted.apply_event(&e);
        }
        assert_eq!(compacted.snapshot_events(), snapshot);
        let _ = fs::remove_file(&path);
    }
}
