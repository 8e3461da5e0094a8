//! Record-level admission rules the ledger applies on top of signatures.
//!
//! A create binds a writer to the account for good, so the writer has to be
//! the authority the record names: the payload's own `authority`, or for a
//! presence the authority of its session. Updates may not touch fields fixed
//! at creation, and a validated presence stays validated.

use alyrasign_core::{
  address::Address,
  identity::Identity,
  record::{Record, RecordKind},
};

/// Why a record failed admission.
pub enum Violation {
  Dangling { reference: Address },
  Writer { writer: Identity, authority: Identity },
  Transition(&'static str),
}

/// The parent a new record must point at, if any.
pub fn parent_of(record: &Record) -> Option<(Address, RecordKind)> {
  match record {
    Record::Session(s) => Some((s.formation, RecordKind::Formation)),
    Record::Presence(p) => Some((p.session, RecordKind::Session)),
    Record::StudentGroup(_) | Record::Formation(_) => None,
  }
}

/// Check a creation. `parent` is the decoded record found at
/// [`parent_of`], or `None` if nothing of the right kind lives there.
pub fn check_create(
  record: &Record,
  writer: Identity,
  payer: Identity,
  parent: Option<&Record>,
) -> Result<(), Violation> {
  match record {
    Record::StudentGroup(g) => require_writer(writer, g.authority),
    Record::Formation(f) => require_writer(writer, f.authority),
    Record::Session(s) => {
      let Some(Record::Formation(formation)) = parent else {
        return Err(Violation::Dangling { reference: s.formation });
      };
      require_writer(writer, s.authority)?;
      // A session may only be opened by the owner of its formation.
      require_writer(s.authority, formation.authority)
    }
    Record::Presence(p) => {
      let Some(Record::Session(session)) = parent else {
        return Err(Violation::Dangling { reference: p.session });
      };
      if p.is_validated {
        return Err(Violation::Transition("presence cannot be created validated"));
      }
      // The student registers themself and pays for it.
      require_writer(payer, p.student)?;
      require_writer(writer, session.authority)
    }
  }
}

/// Check that `new` may replace `old`. Both are the same kind; the caller
/// has already compared the stored kind.
pub fn check_update(old: &Record, new: &Record) -> Result<(), Violation> {
  match (old, new) {
    (Record::StudentGroup(a), Record::StudentGroup(b)) => {
      fixed(a.authority == b.authority, "group authority is fixed")?;
      fixed(a.name == b.name, "group name is fixed")
    }
    (Record::Formation(a), Record::Formation(b)) => {
      fixed(a.authority == b.authority, "formation authority is fixed")
    }
    (Record::Session(a), Record::Session(b)) => {
      fixed(a.authority == b.authority, "session authority is fixed")?;
      fixed(a.formation == b.formation, "session formation is fixed")
    }
    (Record::Presence(a), Record::Presence(b)) => {
      fixed(
        a.session == b.session && a.student == b.student && a.timestamp == b.timestamp,
        "only is_validated may change on a presence",
      )?;
      fixed(!a.is_validated || b.is_validated, "a validated presence stays validated")
    }
    _ => Err(Violation::Transition("record kind is fixed")),
  }
}

fn require_writer(writer: Identity, authority: Identity) -> Result<(), Violation> {
  if writer == authority {
    Ok(())
  } else {
    Err(Violation::Writer { writer, authority })
  }
}

fn fixed(holds: bool, reason: &'static str) -> Result<(), Violation> {
  if holds { Ok(()) } else { Err(Violation::Transition(reason)) }
}

#[cfg(test)]
mod tests {
  use alyrasign_core::record::{Formation, Presence, Session, StudentGroup};

  use super::*;

  fn id(byte: u8) -> Identity { Identity::from_bytes([byte; 32]) }

  fn presence(validated: bool) -> Record {
    Record::Presence(Presence {
      session:      Address::from_bytes([9; 32]),
      student:      id(2),
      timestamp:    10,
      is_validated: validated,
    })
  }

  fn session(authority: Identity) -> Record {
    Record::Session(Session {
      formation: Address::from_bytes([8; 32]),
      date: 1,
      description: String::new(),
      authority,
    })
  }

  #[test]
  fn presence_writer_must_be_session_authority() {
    let parent = session(id(1));
    assert!(check_create(&presence(false), id(1), id(2), Some(&parent)).is_ok());
    assert!(matches!(
      check_create(&presence(false), id(2), id(2), Some(&parent)),
      Err(Violation::Writer { writer, authority }) if writer == id(2) && authority == id(1)
    ));
  }

  #[test]
  fn presence_is_paid_by_its_student_and_starts_unvalidated() {
    let parent = session(id(1));
    assert!(matches!(
      check_create(&presence(false), id(1), id(3), Some(&parent)),
      Err(Violation::Writer { .. })
    ));
    assert!(matches!(
      check_create(&presence(true), id(1), id(2), Some(&parent)),
      Err(Violation::Transition(_))
    ));
  }

  #[test]
  fn child_without_parent_is_dangling() {
    assert!(matches!(
      check_create(&presence(false), id(1), id(2), None),
      Err(Violation::Dangling { .. })
    ));
    let formation = Record::Formation(Formation {
      authority:   id(4),
      name:        "F".into(),
      description: String::new(),
    });
    assert!(matches!(
      check_create(&session(id(1)), id(1), id(1), Some(&formation)),
      Err(Violation::Writer { writer, authority }) if writer == id(1) && authority == id(4)
    ));
  }

  #[test]
  fn group_writer_must_be_its_authority() {
    let group = Record::StudentGroup(StudentGroup {
      authority:  id(1),
      name:       "G".into(),
      students:   vec![],
      formations: vec![],
    });
    assert!(check_create(&group, id(1), id(1), None).is_ok());
    assert!(check_create(&group, id(2), id(1), None).is_err());
  }

  #[test]
  fn validation_only_moves_forward() {
    assert!(check_update(&presence(false), &presence(true)).is_ok());
    assert!(check_update(&presence(true), &presence(true)).is_ok());
    assert!(matches!(
      check_update(&presence(true), &presence(false)),
      Err(Violation::Transition(_))
    ));
  }

  #[test]
  fn fixed_fields_cannot_be_rewritten() {
    assert!(check_update(&session(id(1)), &session(id(2))).is_err());
    let Record::Presence(mut moved) = presence(false) else { unreachable!() };
    moved.timestamp = 11;
    moved.is_validated = true;
    assert!(check_update(&presence(false), &Record::Presence(moved)).is_err());
  }
}
