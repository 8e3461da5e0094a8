//! [`RecordStore`]: the create/read/update façade over a [`Ledger`].
//!
//! Every operation resolves addresses through the one [`AddressDeriver`],
//! runs the [`AuthorizationGuard`] and the codec before touching the network,
//! then submits and waits for confirmation. Nothing here is authoritative;
//! the ledger is.

use std::{collections::VecDeque, marker::PhantomData};

use bytes::Bytes;

use crate::{
  Error, Result,
  address::{Address, AddressDeriver},
  auth::{AuthorizationGuard, Request},
  codec::RecordCodec,
  config::StoreConfig,
  identity::{Identity, Keypair},
  ledger::{Account, Confirmation, Ledger, LedgerError, Write},
  record::{Formation, Presence, Record, RecordKind, RecordType, Session, StudentGroup},
};

// ─── Store ───────────────────────────────────────────────────────────────────

pub struct RecordStore<L> {
  ledger:  L,
  config:  StoreConfig,
  deriver: AddressDeriver,
  codec:   RecordCodec,
}

impl<L: Ledger> RecordStore<L> {
  pub fn new(ledger: L, config: StoreConfig) -> Self {
    let deriver = AddressDeriver::new(
      config.address_salt.as_bytes().to_vec(),
      config.limits.group_name,
    );
    let codec = RecordCodec::new(config.limits);
    Self { ledger, config, deriver, codec }
  }

  pub fn ledger(&self) -> &L { &self.ledger }

  pub fn config(&self) -> &StoreConfig { &self.config }

  pub fn codec(&self) -> &RecordCodec { &self.codec }

  /// The derived address of the group called `name`.
  pub fn group_address(&self, name: &str) -> Result<Address> {
    self.deriver.student_group(name)
  }

  // ── Student groups ────────────────────────────────────────────────────────

  /// Create the group `name`, owned by `authority`.
  ///
  /// Over-long entries and lists are truncated as described in
  /// [`crate::codec`]; the name itself must fit the ceiling since it keys the
  /// address.
  pub async fn create_group(
    &self,
    signer: &Keypair,
    authority: Identity,
    name: &str,
    students: Vec<String>,
    formations: Vec<String>,
  ) -> Result<Address> {
    let address = self.deriver.student_group(name)?;
    AuthorizationGuard::check_creation(&Request::new(signer.identity(), authority))
      .into_result()?;
    let payload = self.codec.encode(&Record::StudentGroup(StudentGroup {
      authority,
      name: name.to_owned(),
      students,
      formations,
    }));

    self.ensure_funded(authority).await?;
    if self.fetch_account(address).await?.is_some() {
      return Err(Error::AlreadyExists(address));
    }

    let write =
      Write::create(address, RecordKind::StudentGroup, payload, authority, authority);
    self.create(signer, write).await?;
    tracing::info!(%address, name, "student group created");
    Ok(address)
  }

  /// Append students to a group. Entries already present are skipped.
  pub async fn add_students(
    &self,
    signer: &Keypair,
    authority: Identity,
    group_name: &str,
    students: Vec<String>,
  ) -> Result<StudentGroup> {
    let limit = self.config.limits.max_students;
    self
      .update_group(signer, authority, group_name, |group| {
        append_unique(&mut group.students, &students, &self.codec);
        if group.students.len() > limit {
          return Err(Error::LimitExceeded { field: "students", limit });
        }
        Ok(())
      })
      .await
  }

  pub async fn remove_students(
    &self,
    signer: &Keypair,
    authority: Identity,
    group_name: &str,
    students: Vec<String>,
  ) -> Result<StudentGroup> {
    self
      .update_group(signer, authority, group_name, |group| {
        remove_all(&mut group.students, &students, &self.codec);
        Ok(())
      })
      .await
  }

  /// Attach formations to a group. Entries already present are skipped.
  pub async fn add_formations(
    &self,
    signer: &Keypair,
    authority: Identity,
    group_name: &str,
    formations: Vec<String>,
  ) -> Result<StudentGroup> {
    let limit = self.config.limits.max_formations;
    self
      .update_group(signer, authority, group_name, |group| {
        append_unique(&mut group.formations, &formations, &self.codec);
        if group.formations.len() > limit {
          return Err(Error::LimitExceeded { field: "formations", limit });
        }
        Ok(())
      })
      .await
  }

  pub async fn remove_formations(
    &self,
    signer: &Keypair,
    authority: Identity,
    group_name: &str,
    formations: Vec<String>,
  ) -> Result<StudentGroup> {
    self
      .update_group(signer, authority, group_name, |group| {
        remove_all(&mut group.formations, &formations, &self.codec);
        Ok(())
      })
      .await
  }

  /// Look a group up by name. Returns `None` if it was never created.
  pub async fn fetch_group(&self, name: &str) -> Result<Option<StudentGroup>> {
    let address = self.deriver.student_group(name)?;
    self.fetch_record(address).await
  }

  /// Every group on the ledger, fetched lazily page by page.
  pub fn fetch_all_groups(&self) -> RecordCursor<'_, L, StudentGroup> {
    RecordCursor::new(self)
  }

  // ── Formations, sessions, presences ───────────────────────────────────────

  /// Create a formation at a fresh address and return that address.
  pub async fn create_formation(
    &self,
    signer: &Keypair,
    authority: Identity,
    name: &str,
    description: &str,
  ) -> Result<Address> {
    AuthorizationGuard::check_creation(&Request::new(signer.identity(), authority))
      .into_result()?;
    let address = Address::generate();
    let payload = self.codec.encode(&Record::Formation(Formation {
      authority,
      name: name.to_owned(),
      description: description.to_owned(),
    }));

    self.ensure_funded(authority).await?;
    let write = Write::create(address, RecordKind::Formation, payload, authority, authority);
    self.create(signer, write).await?;
    tracing::info!(%address, name, "formation created");
    Ok(address)
  }

  /// Create a session of `formation`. Only the formation's authority may do
  /// so.
  pub async fn create_session(
    &self,
    signer: &Keypair,
    authority: Identity,
    formation: Address,
    date: i64,
    description: &str,
  ) -> Result<Address> {
    let request = Request::new(signer.identity(), authority);
    AuthorizationGuard::check_creation(&request).into_result()?;
    let parent: Formation = self.resolve(formation).await?;
    AuthorizationGuard::check(parent.authority, &request).into_result()?;

    let address = Address::generate();
    let payload = self.codec.encode(&Record::Session(Session {
      formation,
      date,
      description: description.to_owned(),
      authority,
    }));

    self.ensure_funded(authority).await?;
    let write = Write::create(address, RecordKind::Session, payload, authority, authority);
    self.create(signer, write).await?;
    tracing::info!(%address, %formation, date, "session created");
    Ok(address)
  }

  /// Record `student`'s presence at `session`. Self-signed by the student;
  /// later updates belong to the session authority.
  pub async fn create_presence(
    &self,
    signer: &Keypair,
    student: Identity,
    session: Address,
    timestamp: i64,
  ) -> Result<Address> {
    AuthorizationGuard::check_creation(&Request::new(signer.identity(), student))
      .into_result()?;
    let parent: Session = self.resolve(session).await?;

    let address = Address::generate();
    let payload = self.codec.encode(&Record::Presence(Presence {
      session,
      student,
      timestamp,
      is_validated: false,
    }));

    self.ensure_funded(student).await?;
    let write =
      Write::create(address, RecordKind::Presence, payload, student, parent.authority);
    self.create(signer, write).await?;
    tracing::info!(%address, %session, %student, "presence registered");
    Ok(address)
  }

  /// Mark a presence as validated. Only the authority of the presence's
  /// session may do this, and only once.
  pub async fn validate_presence(
    &self,
    signer: &Keypair,
    authority: Identity,
    presence: Address,
  ) -> Result<()> {
    let request = Request::new(signer.identity(), authority);
    AuthorizationGuard::check_creation(&request).into_result()?;

    for _ in 0..self.config.retry.attempts() {
      let Some(account) = self.fetch_account(presence).await? else {
        return Err(Error::NotFound(presence));
      };
      let mut record: Presence = self.codec.decode_as(&account.payload)?;
      let session: Session = self.resolve(record.session).await?;
      AuthorizationGuard::check_validation(session.authority, &request).into_result()?;
      if record.is_validated {
        return Err(Error::AlreadyValidated(presence));
      }

      record.is_validated = true;
      self.ensure_funded(authority).await?;
      let payload = self.codec.encode(&Record::Presence(record));
      let write = Write::update(
        presence,
        RecordKind::Presence,
        payload,
        account.version,
        authority,
        session.authority,
      );
      match self.submit(signer, write).await {
        Ok(_) => {
          tracing::info!(address = %presence, "presence validated");
          return Ok(());
        }
        // Someone else wrote first; the next pass sees their result.
        Err(Error::Conflict(_)) => continue,
        // The ledger's stored writer is authoritative over the decoded payload.
        Err(Error::AuthorityMismatch { .. }) => {
          return Err(Error::UnauthorizedValidation(authority));
        }
        Err(err) => return Err(err),
      }
    }
    Err(Error::Conflict(presence))
  }

  pub async fn fetch_formation(&self, address: Address) -> Result<Option<Formation>> {
    self.fetch_record(address).await
  }

  pub async fn fetch_session(&self, address: Address) -> Result<Option<Session>> {
    self.fetch_record(address).await
  }

  pub async fn fetch_presence(&self, address: Address) -> Result<Option<Presence>> {
    self.fetch_record(address).await
  }

  pub fn fetch_all_formations(&self) -> RecordCursor<'_, L, Formation> {
    RecordCursor::new(self)
  }

  /// Fetch and decode the record at `address`. A record of a different kind
  /// at that address is reported as [`Error::MalformedRecord`].
  pub async fn fetch_record<R: RecordType>(&self, address: Address) -> Result<Option<R>> {
    match self.fetch_account(address).await? {
      Some(account) => Ok(Some(self.codec.decode_as(&account.payload)?)),
      None => Ok(None),
    }
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  /// Shared read-modify-write loop for group mutations. `mutate` may run
  /// more than once if another writer gets in between.
  async fn update_group<F>(
    &self,
    signer: &Keypair,
    authority: Identity,
    name: &str,
    mut mutate: F,
  ) -> Result<StudentGroup>
  where
    F: FnMut(&mut StudentGroup) -> Result<()>,
  {
    let request = Request::new(signer.identity(), authority);
    AuthorizationGuard::check_creation(&request).into_result()?;
    let address = self.deriver.student_group(name)?;

    for _ in 0..self.config.retry.attempts() {
      let Some(account) = self.fetch_account(address).await? else {
        return Err(Error::NotFound(address));
      };
      let mut group: StudentGroup = self.codec.decode_as(&account.payload)?;
      AuthorizationGuard::check(group.authority, &request).into_result()?;

      let before = group.clone();
      mutate(&mut group)?;
      if group == before {
        return Ok(group);
      }

      self.ensure_funded(authority).await?;
      let record = self.codec.normalize(Record::from(group));
      let write = Write::update(
        address,
        RecordKind::StudentGroup,
        self.codec.encode(&record),
        account.version,
        authority,
        authority,
      );
      match self.submit(signer, write).await {
        Ok(_) => {
          tracing::info!(%address, name, "student group updated");
          return StudentGroup::try_from(record);
        }
        Err(Error::Conflict(_)) => {
          tracing::debug!(%address, "group changed underneath us, re-reading");
          continue;
        }
        Err(err) => return Err(err),
      }
    }
    Err(Error::Conflict(address))
  }

  /// Resolve a foreign reference. Missing accounts and accounts of another
  /// kind both count as dangling.
  async fn resolve<R: RecordType>(&self, address: Address) -> Result<R> {
    match self.fetch_account(address).await? {
      Some(account) if account.kind == R::KIND => self.codec.decode_as(&account.payload),
      _ => Err(Error::ReferenceNotFound(address)),
    }
  }

  async fn ensure_funded(&self, identity: Identity) -> Result<()> {
    let available = self
      .config
      .retry
      .run("balance", || self.ledger.balance(identity))
      .await?;
    let required = self.config.min_balance;
    if available < required {
      return Err(Error::InsufficientResources { identity, required, available });
    }
    Ok(())
  }

  async fn fetch_account(&self, address: Address) -> Result<Option<Account>> {
    self
      .config
      .retry
      .run("fetch", || self.ledger.fetch(address))
      .await
  }

  /// Submit a creation. If its outcome is unknown, look once at what the
  /// ledger holds instead of re-submitting.
  async fn create(&self, signer: &Keypair, write: Write) -> Result<()> {
    let address = write.address;
    let payload = write.payload.clone();
    match self.submit(signer, write).await {
      Ok(_) => Ok(()),
      Err(Error::AmbiguousOutcome(_)) => self.reconcile_create(address, &payload).await,
      Err(err) => Err(err),
    }
  }

  async fn reconcile_create(&self, address: Address, payload: &Bytes) -> Result<()> {
    tracing::warn!(%address, "creation unconfirmed, re-checking the ledger");
    match self.ledger.fetch(address).await {
      Ok(Some(account)) if account.payload == *payload => {
        tracing::info!(%address, "creation found on ledger after all");
        Ok(())
      }
      _ => Err(Error::AmbiguousOutcome(address)),
    }
  }

  /// Sign, submit, and wait for confirmation, retrying transient failures.
  async fn submit(&self, signer: &Keypair, write: Write) -> Result<Confirmation> {
    let address = write.address;
    let timeout = self.config.confirm_timeout();
    let signed = write.sign(&[signer]);
    tracing::debug!(
      %address,
      kind = %signed.write.kind,
      mode = ?signed.write.mode,
      "submitting write"
    );

    let confirmation = self
      .config
      .retry
      .run("submit", || {
        let signed = signed.clone();
        async move {
          match tokio::time::timeout(timeout, self.ledger.submit(signed)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Unconfirmed {
              address,
              reason: format!("no confirmation within {timeout:?}"),
            }),
          }
        }
      })
      .await?;

    tracing::debug!(
      %address,
      version = confirmation.version,
      slot = confirmation.slot,
      "write confirmed"
    );
    Ok(confirmation)
  }
}

fn append_unique(list: &mut Vec<String>, entries: &[String], codec: &RecordCodec) {
  for entry in entries {
    let entry = codec.truncate_entry(entry);
    if !list.contains(&entry) {
      list.push(entry);
    }
  }
}

fn remove_all(list: &mut Vec<String>, entries: &[String], codec: &RecordCodec) {
  let entries: Vec<String> = entries.iter().map(|e| codec.truncate_entry(e)).collect();
  list.retain(|existing| !entries.contains(existing));
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// A lazy walk over every record of one kind.
///
/// Pages are fetched on demand. Order is whatever the ledger defines and may
/// differ between walks; [`RecordCursor::restart`] begins a new walk.
pub struct RecordCursor<'a, L, R> {
  store:     &'a RecordStore<L>,
  after:     Option<Address>,
  buffer:    VecDeque<Account>,
  exhausted: bool,
  _record:   PhantomData<fn() -> R>,
}

impl<'a, L: Ledger, R: RecordType> RecordCursor<'a, L, R> {
  fn new(store: &'a RecordStore<L>) -> Self {
    Self {
      store,
      after: None,
      buffer: VecDeque::new(),
      exhausted: false,
      _record: PhantomData,
    }
  }

  /// The next record and its address, or `None` once the walk is done.
  pub async fn try_next(&mut self) -> Result<Option<(Address, R)>> {
    if self.buffer.is_empty() && !self.exhausted {
      let store = self.store;
      let limit = store.config.page_size.max(1);
      let after = self.after;
      let page = store
        .config
        .retry
        .run("fetch_page", || store.ledger.fetch_page(R::KIND, after, limit))
        .await?;
      self.exhausted = page.len() < limit;
      if let Some(last) = page.last() {
        self.after = Some(last.address);
      }
      self.buffer.extend(page);
    }

    match self.buffer.pop_front() {
      Some(account) => {
        let record = self.store.codec.decode_as(&account.payload)?;
        Ok(Some((account.address, record)))
      }
      None => Ok(None),
    }
  }

  /// Start over from the beginning of the ledger.
  pub fn restart(&mut self) {
    self.after = None;
    self.buffer.clear();
    self.exhausted = false;
  }

  /// Drain the remaining records into a `Vec`.
  pub async fn try_collect(mut self) -> Result<Vec<(Address, R)>> {
    let mut out = Vec::new();
    while let Some(item) = self.try_next().await? {
      out.push(item);
    }
    Ok(out)
  }
}
