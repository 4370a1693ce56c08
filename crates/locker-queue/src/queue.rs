use std::sync::Arc;

use locker_core::error::{LockerError, Result};
use locker_core::types::{Command, CommandPayload, CommandStatus, KioskId, Timestamp};
use locker_store::StateDb;
use uuid::Uuid;

use crate::backoff::backoff_ms;

#[derive(Clone, Copy, Debug)]
pub struct QueueLimits {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub per_kiosk_depth_limit: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_retries: locker_core::constants::DEFAULT_MAX_RETRIES,
            backoff_base_ms: locker_core::constants::DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: locker_core::constants::DEFAULT_BACKOFF_CAP_MS,
            per_kiosk_depth_limit: locker_core::constants::DEFAULT_PER_KIOSK_DEPTH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Duplicate,
}

/// The durable, idempotent Command Queue (§4.3).
pub struct CommandQueue {
    db: Arc<StateDb>,
    limits: QueueLimits,
}

impl CommandQueue {
    pub fn new(db: Arc<StateDb>, limits: QueueLimits) -> Self {
        Self { db, limits }
    }

    /// Looks up a duplicate ahead of any other work — `None` when there's no
    /// explicit `command_id` (a freshly generated id can never collide), or
    /// no existing row; `Some(existing)` for an identical-payload repeat
    /// under the same id; an error when the id is reused with a different
    /// payload. Callers that apply side effects before enqueueing (the
    /// Gateway's locker-state transition) must call this first and
    /// short-circuit on `Some`, so an idempotent retry never re-applies a
    /// transition against a locker the first attempt already moved.
    pub fn find_existing(
        &self,
        command_id: Option<&str>,
        kiosk_id: &KioskId,
        payload: &CommandPayload,
    ) -> Result<Option<Command>> {
        let Some(command_id) = command_id else {
            return Ok(None);
        };
        match self.db.get_command(command_id)? {
            Some(existing) if existing.payload == *payload && existing.kiosk_id == *kiosk_id => {
                Ok(Some(existing))
            }
            Some(_) => Err(LockerError::DuplicateCommandPayloadMismatch(
                command_id.to_string(),
            )),
            None => Ok(None),
        }
    }

    /// `enqueue`. Idempotent on `command_id` — a repeat with an identical
    /// payload returns `Duplicate` and the existing row; a repeat with a
    /// differing payload is a 409 `DuplicateCommandPayloadMismatch`.
    pub fn enqueue(
        &self,
        kiosk_id: KioskId,
        payload: CommandPayload,
        command_id: Option<String>,
        now: Timestamp,
    ) -> Result<(Command, EnqueueOutcome)> {
        if let Some(existing) = self.find_existing(command_id.as_deref(), &kiosk_id, &payload)? {
            return Ok((existing, EnqueueOutcome::Duplicate));
        }
        let command_id = command_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let batch_size = payload.locker_ids().len().max(1);
        let depth = self.db.count_open_commands_for_kiosk(&kiosk_id)?;
        if depth + batch_size > self.limits.per_kiosk_depth_limit {
            return Err(LockerError::QueueDepthExceeded(kiosk_id.to_string()));
        }

        let command = Command {
            command_id: command_id.clone(),
            kiosk_id,
            payload,
            status: CommandStatus::Pending,
            created_at: now,
            next_attempt_at: now,
            executed_at: None,
            completed_at: None,
            last_error: None,
            retry_count: 0,
            max_retries: self.limits.max_retries,
        };
        self.db.insert_command(&command)?;
        Ok((command, EnqueueOutcome::Accepted))
    }

    /// `claimNext(kiosk_id, lease_ms)`. Atomically selects the oldest pending
    /// row with `next_attempt_at <= now` and transitions it to `executing`
    /// via CAS — no two concurrent callers ever win the same row (§8
    /// property 2). `now_ms` stamps `executed_at` at millisecond resolution,
    /// independent of `now`'s second-granularity scheduling clock.
    pub fn claim_next(
        &self,
        kiosk_id: &KioskId,
        now: Timestamp,
        now_ms: i64,
    ) -> Result<Option<Command>> {
        for candidate in self.db.iter_pending_commands_for_kiosk(kiosk_id)? {
            if candidate.status != CommandStatus::Pending {
                continue;
            }
            if candidate.next_attempt_at > now {
                continue;
            }
            let mut claimed = candidate.clone();
            claimed.status = CommandStatus::Executing;
            claimed.executed_at = Some(now_ms);

            if self.db.cas_command(&candidate, &claimed)? {
                return Ok(Some(claimed));
            }
            // Lost the race to another claimer; move to the next candidate.
        }
        Ok(None)
    }

    /// Idempotent: completing an already-terminal command is a no-op success.
    /// `now_ms` stamps `completed_at` at millisecond resolution.
    pub fn complete(&self, command_id: &str, now_ms: i64) -> Result<Command> {
        let command = self
            .db
            .get_command(command_id)?
            .ok_or_else(|| LockerError::CommandNotFound(command_id.to_string()))?;

        if command.status.is_terminal() {
            return Ok(command);
        }

        let mut completed = command.clone();
        completed.status = CommandStatus::Completed;
        completed.completed_at = Some(now_ms);

        if !self.db.cas_command(&command, &completed)? {
            return self.complete(command_id, now_ms); // retry against fresh row
        }
        Ok(completed)
    }

    /// `fail`: retries with backoff while `retryable ∧ retry_count <
    /// max_retries`; otherwise terminal `failed`. `now` schedules
    /// `next_attempt_at` (seconds); `now_ms` stamps a terminal `completed_at`
    /// at millisecond resolution.
    pub fn fail(
        &self,
        command_id: &str,
        error: &str,
        retryable: bool,
        now: Timestamp,
        now_ms: i64,
    ) -> Result<Command> {
        let command = self
            .db
            .get_command(command_id)?
            .ok_or_else(|| LockerError::CommandNotFound(command_id.to_string()))?;

        if command.status.is_terminal() {
            return Ok(command);
        }

        let mut updated = command.clone();
        updated.last_error = Some(error.to_string());

        if retryable && command.retry_count < command.max_retries {
            updated.status = CommandStatus::Pending;
            updated.retry_count += 1;
            let delay = backoff_ms(
                updated.retry_count,
                self.limits.backoff_base_ms,
                self.limits.backoff_cap_ms,
            );
            updated.next_attempt_at = now + (delay as i64 / 1000).max(0);
        } else {
            updated.status = CommandStatus::Failed;
            updated.completed_at = Some(now_ms);
        }

        if !self.db.cas_command(&command, &updated)? {
            return self.fail(command_id, error, retryable, now, now_ms);
        }
        Ok(updated)
    }

    /// `cancel`: only valid while `pending`. `now_ms` stamps `completed_at`
    /// at millisecond resolution.
    pub fn cancel(&self, command_id: &str, now_ms: i64) -> Result<Command> {
        let command = self
            .db
            .get_command(command_id)?
            .ok_or_else(|| LockerError::CommandNotFound(command_id.to_string()))?;

        if command.status != CommandStatus::Pending {
            return Err(LockerError::AlreadyTerminal(command_id.to_string()));
        }

        let mut cancelled = command.clone();
        cancelled.status = CommandStatus::Cancelled;
        cancelled.completed_at = Some(now_ms);

        if !self.db.cas_command(&command, &cancelled)? {
            return self.cancel(command_id, now_ms);
        }
        Ok(cancelled)
    }

    pub fn status(&self, command_id: &str) -> Result<Command> {
        self.db
            .get_command(command_id)?
            .ok_or_else(|| LockerError::CommandNotFound(command_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::types::CommandPayload;

    fn open_tmp() -> (Arc<StateDb>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        (db, dir)
    }

    fn open_payload(locker_id: u32) -> CommandPayload {
        CommandPayload::OpenLocker {
            locker_id,
            staff_user: "alice".into(),
            reason: "test".into(),
            override_vip: false,
        }
    }

    #[test]
    fn idempotent_enqueue_with_same_payload_returns_duplicate() {
        let (db, _dir) = open_tmp();
        let queue = CommandQueue::new(db, QueueLimits::default());
        let kiosk_id = KioskId::new("KIOSK-1");

        let (first, outcome1) = queue
            .enqueue(kiosk_id.clone(), open_payload(1), Some("c1".into()), 1000)
            .unwrap();
        let (second, outcome2) = queue
            .enqueue(kiosk_id, open_payload(1), Some("c1".into()), 1001)
            .unwrap();

        assert_eq!(outcome1, EnqueueOutcome::Accepted);
        assert_eq!(outcome2, EnqueueOutcome::Duplicate);
        assert_eq!(first.command_id, second.command_id);
    }

    #[test]
    fn enqueue_with_differing_payload_for_same_id_is_conflict() {
        let (db, _dir) = open_tmp();
        let queue = CommandQueue::new(db, QueueLimits::default());
        let kiosk_id = KioskId::new("KIOSK-1");

        queue
            .enqueue(kiosk_id.clone(), open_payload(1), Some("c1".into()), 1000)
            .unwrap();
        let err = queue
            .enqueue(kiosk_id, open_payload(2), Some("c1".into()), 1000)
            .unwrap_err();
        assert!(matches!(err, LockerError::DuplicateCommandPayloadMismatch(_)));
    }

    #[test]
    fn claim_next_returns_oldest_pending_and_marks_executing() {
        let (db, _dir) = open_tmp();
        let queue = CommandQueue::new(db, QueueLimits::default());
        let kiosk_id = KioskId::new("KIOSK-1");

        queue
            .enqueue(kiosk_id.clone(), open_payload(1), None, 1000)
            .unwrap();
        queue
            .enqueue(kiosk_id.clone(), open_payload(2), None, 1001)
            .unwrap();

        let claimed = queue.claim_next(&kiosk_id, 2000, 2_000_000).unwrap().unwrap();
        assert_eq!(claimed.status, CommandStatus::Executing);
        assert_eq!(claimed.created_at, 1000);
    }

    #[test]
    fn claim_next_never_hands_out_the_same_row_twice() {
        let (db, _dir) = open_tmp();
        let queue = CommandQueue::new(db, QueueLimits::default());
        let kiosk_id = KioskId::new("KIOSK-1");
        queue
            .enqueue(kiosk_id.clone(), open_payload(1), None, 1000)
            .unwrap();

        let first = queue.claim_next(&kiosk_id, 2000, 2_000_000).unwrap();
        let second = queue.claim_next(&kiosk_id, 2000, 2_000_000).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn fail_retries_then_terminates_after_max_retries() {
        let (db, _dir) = open_tmp();
        let limits = QueueLimits {
            max_retries: 1,
            ..QueueLimits::default()
        };
        let queue = CommandQueue::new(db, limits);
        let kiosk_id = KioskId::new("KIOSK-1");
        let (cmd, _) = queue
            .enqueue(kiosk_id.clone(), open_payload(1), None, 1000)
            .unwrap();
        queue.claim_next(&kiosk_id, 1000, 1_000_000).unwrap();

        let retried = queue
            .fail(&cmd.command_id, "timeout", true, 1001, 1_001_000)
            .unwrap();
        assert_eq!(retried.status, CommandStatus::Pending);
        assert_eq!(retried.retry_count, 1);

        queue
            .claim_next(&kiosk_id, retried.next_attempt_at, 1_001_000)
            .unwrap();
        let failed = queue
            .fail(&cmd.command_id, "timeout", true, 1005, 1_005_000)
            .unwrap();
        assert_eq!(failed.status, CommandStatus::Failed);
    }

    #[test]
    fn complete_is_idempotent_on_terminal_command() {
        let (db, _dir) = open_tmp();
        let queue = CommandQueue::new(db, QueueLimits::default());
        let kiosk_id = KioskId::new("KIOSK-1");
        let (cmd, _) = queue
            .enqueue(kiosk_id.clone(), open_payload(1), None, 1000)
            .unwrap();
        queue.claim_next(&kiosk_id, 1000, 1_000_000).unwrap();

        let first = queue.complete(&cmd.command_id, 1_010_000).unwrap();
        let second = queue.complete(&cmd.command_id, 9_999_000).unwrap();
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[test]
    fn cancel_fails_once_command_is_no_longer_pending() {
        let (db, _dir) = open_tmp();
        let queue = CommandQueue::new(db, QueueLimits::default());
        let kiosk_id = KioskId::new("KIOSK-1");
        let (cmd, _) = queue
            .enqueue(kiosk_id.clone(), open_payload(1), None, 1000)
            .unwrap();
        queue.claim_next(&kiosk_id, 1000, 1_000_000).unwrap();

        let err = queue.cancel(&cmd.command_id, 1_001_000).unwrap_err();
        assert!(matches!(err, LockerError::AlreadyTerminal(_)));
    }

    #[test]
    fn enqueue_rejects_once_depth_limit_exceeded() {
        let (db, _dir) = open_tmp();
        let limits = QueueLimits {
            per_kiosk_depth_limit: 2,
            ..QueueLimits::default()
        };
        let queue = CommandQueue::new(db, limits);
        let kiosk_id = KioskId::new("KIOSK-1");

        queue.enqueue(kiosk_id.clone(), open_payload(1), None, 1000).unwrap();
        queue.enqueue(kiosk_id.clone(), open_payload(2), None, 1000).unwrap();
        let err = queue
            .enqueue(kiosk_id, open_payload(3), None, 1000)
            .unwrap_err();
        assert!(matches!(err, LockerError::QueueDepthExceeded(_)));
    }
}
