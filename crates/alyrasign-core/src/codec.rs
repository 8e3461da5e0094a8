//! Binary layout for records, and the field-length ceilings it enforces.
//!
//! ```text
//! u8        layout version (currently 1)
//! u8        record kind discriminant
//! ...       fields in declaration order
//! ```
//!
//! Field encodings: identities and addresses are 32 raw bytes; integers are
//! little-endian `i64`; booleans are a single `0`/`1` byte; strings are a
//! `u32` byte length followed by UTF-8; string lists are a `u32` entry count
//! followed by that many strings.
//!
//! Ceilings are applied when encoding: strings are cut at the byte ceiling
//! (backing off to a UTF-8 boundary), duplicate students are dropped keeping
//! the first occurrence, then lists are cut to the count ceiling. The result
//! is exactly [`RecordCodec::normalize`], so callers can predict it.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;

use crate::{
  Error, Result,
  address::Address,
  identity::Identity,
  record::{Formation, Presence, Record, RecordKind, Session, StudentGroup},
};

/// Current layout version written in the first byte.
pub const LAYOUT_VERSION: u8 = 1;

// ─── Limits ──────────────────────────────────────────────────────────────────

/// Field-length ceilings. The group ceilings are part of the wire contract;
/// changing them breaks interoperability with existing ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
  /// Max bytes in a group name.
  pub group_name:     usize,
  /// Max bytes in a single student or formation entry of a group.
  pub entry:          usize,
  pub max_students:   usize,
  pub max_formations: usize,
  /// Max bytes in a formation name.
  pub formation_name: usize,
  /// Max bytes in a formation or session description.
  pub description:    usize,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      group_name:     50,
      entry:          50,
      max_students:   100,
      max_formations: 20,
      formation_name: 100,
      description:    500,
    }
  }
}

// ─── Codec ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecordCodec {
  limits: Limits,
}

impl RecordCodec {
  pub fn new(limits: Limits) -> Self { Self { limits } }

  pub fn limits(&self) -> &Limits { &self.limits }

  /// Cut a single group entry (student or formation) to the entry ceiling.
  pub fn truncate_entry(&self, entry: &str) -> String {
    truncate_utf8(entry, self.limits.entry).to_owned()
  }

  /// Apply every ceiling to `record`. Encoding a record and decoding it again
  /// yields exactly this value.
  pub fn normalize(&self, record: Record) -> Record {
    let l = &self.limits;
    match record {
      Record::StudentGroup(g) => {
        let mut students: Vec<String> = Vec::with_capacity(g.students.len());
        for s in &g.students {
          let s = self.truncate_entry(s);
          if !students.contains(&s) {
            students.push(s);
          }
        }
        students.truncate(l.max_students);

        let mut formations: Vec<String> =
          g.formations.iter().map(|f| self.truncate_entry(f)).collect();
        formations.truncate(l.max_formations);

        Record::StudentGroup(StudentGroup {
          authority: g.authority,
          name: truncate_utf8(&g.name, l.group_name).to_owned(),
          students,
          formations,
        })
      }
      Record::Formation(f) => Record::Formation(Formation {
        authority:   f.authority,
        name:        truncate_utf8(&f.name, l.formation_name).to_owned(),
        description: truncate_utf8(&f.description, l.description).to_owned(),
      }),
      Record::Session(s) => Record::Session(Session {
        description: truncate_utf8(&s.description, l.description).to_owned(),
        ..s
      }),
      Record::Presence(p) => Record::Presence(p),
    }
  }

  /// Encode `record`, applying ceilings first.
  pub fn encode(&self, record: &Record) -> Bytes {
    let record = self.normalize(record.clone());
    let mut buf = BytesMut::with_capacity(128);
    buf.put_u8(LAYOUT_VERSION);
    buf.put_u8(record.kind().discriminant());

    match &record {
      Record::StudentGroup(g) => {
        buf.put_slice(g.authority.as_bytes());
        put_str(&mut buf, &g.name);
        put_str_list(&mut buf, &g.students);
        put_str_list(&mut buf, &g.formations);
      }
      Record::Formation(f) => {
        buf.put_slice(f.authority.as_bytes());
        put_str(&mut buf, &f.name);
        put_str(&mut buf, &f.description);
      }
      Record::Session(s) => {
        buf.put_slice(s.formation.as_bytes());
        buf.put_i64_le(s.date);
        put_str(&mut buf, &s.description);
        buf.put_slice(s.authority.as_bytes());
      }
      Record::Presence(p) => {
        buf.put_slice(p.session.as_bytes());
        buf.put_slice(p.student.as_bytes());
        buf.put_i64_le(p.timestamp);
        buf.put_u8(u8::from(p.is_validated));
      }
    }
    buf.freeze()
  }

  /// Decode `bytes`, which must hold a record of `expected` kind.
  ///
  /// - unknown version or discriminant → [`Error::UnknownRecordKind`]
  /// - a different known kind, a length field that overruns the buffer,
  ///   a ceiling violation, invalid UTF-8 or trailing bytes →
  ///   [`Error::MalformedRecord`]
  pub fn decode(&self, bytes: &[u8], expected: RecordKind) -> Result<Record> {
    let l = &self.limits;
    let mut r = Reader::new(bytes);

    let version = r.u8()?;
    let discriminant = r.u8()?;
    if version != LAYOUT_VERSION {
      return Err(Error::UnknownRecordKind { version, discriminant });
    }
    let kind = RecordKind::from_discriminant(discriminant)
      .ok_or(Error::UnknownRecordKind { version, discriminant })?;
    if kind != expected {
      return Err(Error::MalformedRecord(format!(
        "expected {expected}, found {kind}"
      )));
    }

    let record = match kind {
      RecordKind::StudentGroup => {
        let authority = r.identity()?;
        let name = r.string("name", l.group_name)?;
        let students = r.string_list("students", l.max_students, l.entry)?;
        let formations = r.string_list("formations", l.max_formations, l.entry)?;
        for (i, s) in students.iter().enumerate() {
          if students[..i].contains(s) {
            return Err(Error::MalformedRecord(format!(
              "duplicate student entry {s:?}"
            )));
          }
        }
        Record::StudentGroup(StudentGroup { authority, name, students, formations })
      }
      RecordKind::Formation => Record::Formation(Formation {
        authority:   r.identity()?,
        name:        r.string("name", l.formation_name)?,
        description: r.string("description", l.description)?,
      }),
      RecordKind::Session => Record::Session(Session {
        formation:   r.address()?,
        date:        r.i64()?,
        description: r.string("description", l.description)?,
        authority:   r.identity()?,
      }),
      RecordKind::Presence => Record::Presence(Presence {
        session:      r.address()?,
        student:      r.identity()?,
        timestamp:    r.i64()?,
        is_validated: r.bool()?,
      }),
    };

    r.finish()?;
    Ok(record)
  }

  /// Decode and extract a concrete record type.
  pub fn decode_as<R: crate::record::RecordType>(&self, bytes: &[u8]) -> Result<R> {
    self.decode(bytes, R::KIND)?.try_into()
  }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_utf8(s: &str, max: usize) -> &str {
  if s.len() <= max {
    return s;
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  &s[..end]
}

fn put_str(buf: &mut BytesMut, s: &str) {
  buf.put_u32_le(s.len() as u32);
  buf.put_slice(s.as_bytes());
}

fn put_str_list(buf: &mut BytesMut, list: &[String]) {
  buf.put_u32_le(list.len() as u32);
  for s in list {
    put_str(buf, s);
  }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Bounds-checked cursor over an encoded record.
struct Reader<'a> {
  buf: &'a [u8],
}

impl<'a> Reader<'a> {
  fn new(buf: &'a [u8]) -> Self { Self { buf } }

  fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
    if self.buf.len() < n {
      return Err(Error::MalformedRecord(format!(
        "{what}: need {n} bytes, {} remain",
        self.buf.len()
      )));
    }
    let (head, tail) = self.buf.split_at(n);
    self.buf = tail;
    Ok(head)
  }

  fn array32(&mut self, what: &str) -> Result<[u8; 32]> {
    let mut out = [0u8; 32];
    out.copy_from_slice(self.take(32, what)?);
    Ok(out)
  }

  fn u8(&mut self) -> Result<u8> { Ok(self.take(1, "u8")?[0]) }

  fn u32(&mut self, what: &str) -> Result<u32> {
    let mut out = [0u8; 4];
    out.copy_from_slice(self.take(4, what)?);
    Ok(u32::from_le_bytes(out))
  }

  fn i64(&mut self) -> Result<i64> {
    let mut out = [0u8; 8];
    out.copy_from_slice(self.take(8, "i64")?);
    Ok(i64::from_le_bytes(out))
  }

  fn bool(&mut self) -> Result<bool> {
    match self.u8()? {
      0 => Ok(false),
      1 => Ok(true),
      other => Err(Error::MalformedRecord(format!("invalid bool byte {other}"))),
    }
  }

  fn identity(&mut self) -> Result<Identity> {
    Ok(Identity::from_bytes(self.array32("identity")?))
  }

  fn address(&mut self) -> Result<Address> {
    Ok(Address::from_bytes(self.array32("address")?))
  }

  fn string(&mut self, what: &str, max: usize) -> Result<String> {
    let len = self.u32(what)? as usize;
    if len > max {
      return Err(Error::MalformedRecord(format!(
        "{what}: {len} bytes exceeds ceiling {max}"
      )));
    }
    let bytes = self.take(len, what)?;
    String::from_utf8(bytes.to_vec())
      .map_err(|e| Error::MalformedRecord(format!("{what}: {e}")))
  }

  fn string_list(&mut self, what: &str, max_len: usize, max_entry: usize) -> Result<Vec<String>> {
    let count = self.u32(what)? as usize;
    if count > max_len {
      return Err(Error::MalformedRecord(format!(
        "{what}: {count} entries exceeds ceiling {max_len}"
      )));
    }
    // Every entry needs at least its 4-byte length prefix.
    if count.saturating_mul(4) > self.buf.len() {
      return Err(Error::MalformedRecord(format!(
        "{what}: {count} entries cannot fit in {} bytes",
        self.buf.len()
      )));
    }
    (0..count).map(|_| self.string(what, max_entry)).collect()
  }

  fn finish(self) -> Result<()> {
    if self.buf.is_empty() {
      Ok(())
    } else {
      Err(Error::MalformedRecord(format!(
        "{} trailing bytes",
        self.buf.len()
      )))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn codec() -> RecordCodec { RecordCodec::default() }

  fn authority() -> Identity { Identity::from_bytes([9; 32]) }

  fn group(name: &str, students: Vec<String>, formations: Vec<String>) -> Record {
    Record::StudentGroup(StudentGroup {
      authority: authority(),
      name: name.into(),
      students,
      formations,
    })
  }

  fn samples() -> Vec<Record> {
    vec![
      group("Cohort2024", vec!["student1".into(), "student2".into()], vec!["formA".into()]),
      group("empty", vec![], vec![]),
      Record::Formation(Formation {
        authority:   authority(),
        name:        "Rust avancé".into(),
        description: "Ownership, lifetimes, async".into(),
      }),
      Record::Session(Session {
        formation:   Address::from_bytes([3; 32]),
        date:        1_700_000_000,
        description: "Intro".into(),
        authority:   authority(),
      }),
      Record::Presence(Presence {
        session:      Address::from_bytes([4; 32]),
        student:      Identity::from_bytes([5; 32]),
        timestamp:    -42,
        is_validated: true,
      }),
    ]
  }

  #[test]
  fn valid_records_roundtrip() {
    let c = codec();
    for record in samples() {
      let bytes = c.encode(&record);
      assert_eq!(c.decode(&bytes, record.kind()).unwrap(), record);
    }
  }

  #[test]
  fn header_carries_version_and_kind() {
    let bytes = codec().encode(&samples()[0]);
    assert_eq!(bytes[0], LAYOUT_VERSION);
    assert_eq!(bytes[1], RecordKind::StudentGroup.discriminant());
  }

  #[test]
  fn long_group_name_is_cut_to_fifty_bytes() {
    let c = codec();
    let name = "g".repeat(80);
    let bytes = c.encode(&group(&name, vec![], vec![]));
    let decoded: StudentGroup = c.decode_as(&bytes).unwrap();
    assert_eq!(decoded.name.len(), 50);
    assert_eq!(decoded.name, "g".repeat(50));
  }

  #[test]
  fn student_list_is_cut_to_first_hundred() {
    let c = codec();
    let students: Vec<String> = (0..150).map(|i| format!("student{i}")).collect();
    let bytes = c.encode(&group("big", students.clone(), vec![]));
    let decoded: StudentGroup = c.decode_as(&bytes).unwrap();
    assert_eq!(decoded.students.len(), 100);
    assert_eq!(decoded.students, students[..100]);
  }

  #[test]
  fn formation_list_is_cut_to_twenty() {
    let c = codec();
    let formations: Vec<String> = (0..25).map(|i| format!("f{i}")).collect();
    let decoded: StudentGroup = c
      .decode_as(&c.encode(&group("g", vec![], formations.clone())))
      .unwrap();
    assert_eq!(decoded.formations, formations[..20]);
  }

  #[test]
  fn entries_are_cut_then_deduplicated() {
    let c = codec();
    let base = "s".repeat(50);
    let students = vec![base.clone() + "tail-a", base.clone() + "tail-b", "x".into()];
    let decoded: StudentGroup =
      c.decode_as(&c.encode(&group("g", students, vec![]))).unwrap();
    assert_eq!(decoded.students, vec![base, "x".to_string()]);
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    let c = codec();
    // 49 ASCII bytes then a 2-byte char straddling the ceiling.
    let name = format!("{}é", "a".repeat(49));
    let decoded: StudentGroup =
      c.decode_as(&c.encode(&group(&name, vec![], vec![]))).unwrap();
    assert_eq!(decoded.name, "a".repeat(49));
  }

  #[test]
  fn normalize_predicts_encoding() {
    let c = codec();
    let record = group(&"n".repeat(70), vec!["a".into(), "a".into()], vec![]);
    let predicted = c.normalize(record.clone());
    let decoded = c.decode(&c.encode(&record), RecordKind::StudentGroup).unwrap();
    assert_eq!(decoded, predicted);
  }

  #[test]
  fn overrunning_length_is_malformed() {
    let c = codec();
    let mut bytes = c.encode(&samples()[2]).to_vec();
    // Corrupt the name length (right after header + authority).
    bytes[34..38].copy_from_slice(&400u32.to_le_bytes());
    let err = c.decode(&bytes, RecordKind::Formation).unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
  }

  #[test]
  fn truncated_buffer_is_malformed() {
    let c = codec();
    let bytes = c.encode(&samples()[3]);
    let err = c
      .decode(&bytes[..bytes.len() - 1], RecordKind::Session)
      .unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
  }

  #[test]
  fn trailing_bytes_are_malformed() {
    let c = codec();
    let mut bytes = c.encode(&samples()[4]).to_vec();
    bytes.push(0);
    let err = c.decode(&bytes, RecordKind::Presence).unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
  }

  #[test]
  fn unknown_version_or_kind_is_rejected() {
    let c = codec();
    let mut bytes = c.encode(&samples()[4]).to_vec();
    bytes[0] = 2;
    assert!(matches!(
      c.decode(&bytes, RecordKind::Presence),
      Err(Error::UnknownRecordKind { version: 2, .. })
    ));

    bytes[0] = LAYOUT_VERSION;
    bytes[1] = 0xee;
    assert!(matches!(
      c.decode(&bytes, RecordKind::Presence),
      Err(Error::UnknownRecordKind { discriminant: 0xee, .. })
    ));
  }

  #[test]
  fn kind_mismatch_is_malformed() {
    let c = codec();
    let bytes = c.encode(&samples()[2]);
    assert!(matches!(
      c.decode(&bytes, RecordKind::Session),
      Err(Error::MalformedRecord(_))
    ));
  }

  #[test]
  fn invalid_bool_is_malformed() {
    let c = codec();
    let mut bytes = c.encode(&samples()[4]).to_vec();
    let last = bytes.len() - 1;
    bytes[last] = 7;
    assert!(matches!(
      c.decode(&bytes, RecordKind::Presence),
      Err(Error::MalformedRecord(_))
    ));
  }

  #[test]
  fn duplicate_students_on_the_wire_are_malformed() {
    let c = codec();
    let mut buf = BytesMut::new();
    buf.put_u8(LAYOUT_VERSION);
    buf.put_u8(RecordKind::StudentGroup.discriminant());
    buf.put_slice(authority().as_bytes());
    put_str(&mut buf, "g");
    put_str_list(&mut buf, &["a".to_string(), "a".to_string()]);
    put_str_list(&mut buf, &[]);
    assert!(matches!(
      c.decode(&buf, RecordKind::StudentGroup),
      Err(Error::MalformedRecord(_))
    ));
  }
}
