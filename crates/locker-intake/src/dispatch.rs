use locker_core::types::{KioskId, LockerNum, LockerStatus, OwnerType};

/// What a scan resolves to, run server-side against the State Manager
/// (§4.7's "the state manager treats `device` owners identically to `rfid`
/// owners... but VIP reservations override both").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// No locker currently claimed by this uid on this kiosk — reserve a
    /// free, non-VIP one.
    AssignRfid,
    /// uid holds a `Reserved` locker — confirm and pulse it open.
    ConfirmOwnership { locker_id: LockerNum },
    /// uid holds an `Owned` (or VIP) locker — release it.
    PresentRfid { locker_id: LockerNum },
}

/// One locker this owner currently holds on the kiosk, as seen by the
/// dispatcher — just enough to pick an `Action` without giving the intake
/// crate a dependency on the state store.
pub struct OwnedLocker {
    pub locker_id: LockerNum,
    pub status: LockerStatus,
}

/// Looks up what (if anything) `owner_key` currently holds on `kiosk_id`.
/// Implemented by the Gateway against `locker-state`/`locker-store`; kept as
/// a trait here so dispatch logic is unit-testable without a live store.
pub trait OwnershipLookup {
    fn find_owned_locker(&self, kiosk_id: &KioskId, owner_key: &str) -> Option<OwnedLocker>;
}

/// Chooses the State Manager transition for a scan, per §4.7's dispatch
/// rule: a uid that already owns (or has reserved) a locker resumes that
/// flow; otherwise it starts a new one. `owner_type` (`rfid` vs `device`) is
/// not consulted here — the state manager treats both identically per
/// §4.7 — but VIP ownership is surfaced through the same `Owned` lookup,
/// since a VIP locker is simply pre-owned before any scan occurs.
pub fn dispatch(
    lookup: &dyn OwnershipLookup,
    kiosk_id: &KioskId,
    owner_key: &str,
) -> Action {
    match lookup.find_owned_locker(kiosk_id, owner_key) {
        Some(OwnedLocker {
            locker_id,
            status: LockerStatus::Reserved,
        }) => Action::ConfirmOwnership { locker_id },
        Some(OwnedLocker {
            locker_id,
            status: LockerStatus::Owned,
        }) => Action::PresentRfid { locker_id },
        _ => Action::AssignRfid,
    }
}

#[allow(dead_code)]
fn _owner_type_hint(_: OwnerType) {}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLookup(Option<OwnedLocker>);

    impl OwnershipLookup for FakeLookup {
        fn find_owned_locker(&self, _kiosk_id: &KioskId, _owner_key: &str) -> Option<OwnedLocker> {
            match &self.0 {
                Some(l) => Some(OwnedLocker {
                    locker_id: l.locker_id,
                    status: l.status,
                }),
                None => None,
            }
        }
    }

    #[test]
    fn no_existing_claim_assigns_a_new_locker() {
        let lookup = FakeLookup(None);
        let action = dispatch(&lookup, &KioskId::new("KIOSK-1"), "UID1");
        assert_eq!(action, Action::AssignRfid);
    }

    #[test]
    fn reserved_locker_confirms_ownership() {
        let lookup = FakeLookup(Some(OwnedLocker {
            locker_id: 5,
            status: LockerStatus::Reserved,
        }));
        let action = dispatch(&lookup, &KioskId::new("KIOSK-1"), "UID1");
        assert_eq!(action, Action::ConfirmOwnership { locker_id: 5 });
    }

    #[test]
    fn owned_locker_presents_for_release() {
        let lookup = FakeLookup(Some(OwnedLocker {
            locker_id: 9,
            status: LockerStatus::Owned,
        }));
        let action = dispatch(&lookup, &KioskId::new("KIOSK-1"), "UID1");
        assert_eq!(action, Action::PresentRfid { locker_id: 9 });
    }

    #[test]
    fn locker_in_an_unrelated_status_is_treated_as_no_claim() {
        // e.g. stale Opening row from a previous pulse that already
        // resolved — dispatch falls back to a fresh assign rather than
        // guessing at a transition the state manager would reject anyway.
        let lookup = FakeLookup(Some(OwnedLocker {
            locker_id: 9,
            status: LockerStatus::Opening,
        }));
        let action = dispatch(&lookup, &KioskId::new("KIOSK-1"), "UID1");
        assert_eq!(action, Action::AssignRfid);
    }
}
