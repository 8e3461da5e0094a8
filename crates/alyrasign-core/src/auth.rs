//! Client-side authorization checks.
//!
//! Every mutation carries two identities: the one that actually signed it
//! and the authority it claims to act as. Both must line up. The ledger
//! re-checks signatures on its side; these checks only spare a round-trip.

use crate::{Error, Result, identity::Identity};

/// Who is asking, and as whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
  /// The identity whose key signed the submission.
  pub signer:            Identity,
  /// The authority the request asserts.
  pub claimed_authority: Identity,
}

impl Request {
  pub fn new(signer: Identity, claimed_authority: Identity) -> Self {
    Self { signer, claimed_authority }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
  /// The signer is not the claimed authority.
  SignerMismatch { signer: Identity, claimed: Identity },
  /// The claimed authority is not the record's authority.
  AuthorityMismatch { stored: Identity, claimed: Identity },
  /// The requester is not the authority of the presence's session.
  NotSessionAuthority { session_authority: Identity, requester: Identity },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Allow,
  Deny(DenyReason),
}

impl Decision {
  pub fn is_allowed(&self) -> bool { matches!(self, Self::Allow) }

  pub fn into_result(self) -> Result<()> {
    match self {
      Self::Allow => Ok(()),
      Self::Deny(DenyReason::SignerMismatch { signer, claimed }) => {
        Err(Error::SignerMismatch { signer, claimed })
      }
      Self::Deny(DenyReason::AuthorityMismatch { stored, claimed }) => {
        Err(Error::AuthorityMismatch { stored, claimed })
      }
      Self::Deny(DenyReason::NotSessionAuthority { requester, .. }) => {
        Err(Error::UnauthorizedValidation(requester))
      }
    }
  }
}

/// Stateless authorization checks.
pub struct AuthorizationGuard;

impl AuthorizationGuard {
  /// Mutation of an existing record owned by `stored`.
  ///
  /// The signer check runs first: a claim that nobody signed for is
  /// rejected regardless of what it claims.
  pub fn check(stored: Identity, request: &Request) -> Decision {
    match Self::check_creation(request) {
      Decision::Allow if request.claimed_authority != stored => {
        Decision::Deny(DenyReason::AuthorityMismatch {
          stored,
          claimed: request.claimed_authority,
        })
      }
      decision => decision,
    }
  }

  /// Creation of a new record; the claimed authority becomes its authority,
  /// so only the signer check applies.
  pub fn check_creation(request: &Request) -> Decision {
    if request.signer == request.claimed_authority {
      Decision::Allow
    } else {
      Decision::Deny(DenyReason::SignerMismatch {
        signer:  request.signer,
        claimed: request.claimed_authority,
      })
    }
  }

  /// Validation of a presence, which is decided by the session's authority
  /// rather than anything stored on the presence itself.
  pub fn check_validation(session_authority: Identity, request: &Request) -> Decision {
    match Self::check_creation(request) {
      Decision::Allow if request.claimed_authority != session_authority => {
        Decision::Deny(DenyReason::NotSessionAuthority {
          session_authority,
          requester: request.claimed_authority,
        })
      }
      decision => decision,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const OWNER: Identity = Identity::from_bytes([1; 32]);
  const OTHER: Identity = Identity::from_bytes([2; 32]);

  #[test]
  fn owner_signing_as_owner_is_allowed() {
    let req = Request::new(OWNER, OWNER);
    assert!(AuthorizationGuard::check(OWNER, &req).is_allowed());
  }

  #[test]
  fn unsigned_claim_of_correct_authority_is_denied() {
    // Claims the stored authority, but someone else signed.
    let req = Request::new(OTHER, OWNER);
    assert_eq!(
      AuthorizationGuard::check(OWNER, &req),
      Decision::Deny(DenyReason::SignerMismatch { signer: OTHER, claimed: OWNER })
    );
  }

  #[test]
  fn self_signed_claim_of_wrong_authority_is_denied() {
    let req = Request::new(OTHER, OTHER);
    assert_eq!(
      AuthorizationGuard::check(OWNER, &req),
      Decision::Deny(DenyReason::AuthorityMismatch { stored: OWNER, claimed: OTHER })
    );
  }

  #[test]
  fn creation_requires_matching_signer() {
    assert!(AuthorizationGuard::check_creation(&Request::new(OTHER, OTHER)).is_allowed());
    let err = AuthorizationGuard::check_creation(&Request::new(OTHER, OWNER))
      .into_result()
      .unwrap_err();
    assert!(matches!(err, Error::SignerMismatch { .. }));
  }

  #[test]
  fn validation_compares_against_session_authority() {
    assert!(
      AuthorizationGuard::check_validation(OWNER, &Request::new(OWNER, OWNER)).is_allowed()
    );

    let err = AuthorizationGuard::check_validation(OWNER, &Request::new(OTHER, OTHER))
      .into_result()
      .unwrap_err();
    assert!(matches!(err, Error::UnauthorizedValidation(id) if id == OTHER));

    let err = AuthorizationGuard::check_validation(OWNER, &Request::new(OTHER, OWNER))
      .into_result()
      .unwrap_err();
    assert!(matches!(err, Error::SignerMismatch { .. }));
  }
}
