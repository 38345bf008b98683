//! # Sync engine — replays the pending queue against the server
//!
//! A flush walks the queue one entity type at a time in
//! [`EntityType::SYNC_ORDER`] so that residents reach the server before the
//! aids that point at them. Within a type, operations go out one by one in
//! queue order:
//!
//! - **create**: `POST` without the temporary id; the local entry is moved to
//!   the server id and every queued or cached reference to the temporary id
//!   is rewritten.
//! - **update**: `PUT`; the cached copy takes the server's answer.
//! - **delete**: `DELETE`; "not found" counts as done.
//!
//! The first failure stops the rest of that type's batch so the queue keeps
//! its order. An operation that still points at an unsynced record stops its
//! batch the same way, unless that record will never be sent, in which case
//! the operation is discarded. An authentication failure stops the whole flush
//! and drops the refused session.
//!
//! A flush requested while another one is running is folded into the running
//! one, which goes over the queue again before it returns.
//!
//! Each pass over the queue that had something to send ends with one summary
//! entry in the [`ActivityLog`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use api::{ApiError, RemoteApi};
use store::{
    CreateConfirmation, EntityType, KvStore, LocalStore, OpKind, PendingOperation, PendingQueue,
    RecordId, StoreError,
};
use thiserror::Error;

use crate::activity_log::ActivityLog;
use crate::context::SyncContext;

#[derive(Debug, Error)]
enum ReplayError {
    #[error(transparent)]
    Remote(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Why a flush did not look at the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
    SignedOut,
}

/// Outcome of one [`SyncEngine::flush`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushReport {
    Skipped(SkipReason),
    /// Nothing was queued.
    Empty,
    /// Every batch ran until it finished or hit a failing operation.
    Done { synced: usize, remaining: usize },
    /// The flush stopped early: the token was refused or the local store
    /// failed.
    Aborted {
        synced: usize,
        remaining: usize,
        reason: String,
    },
}

impl FlushReport {
    /// Fold the report of a follow-up pass into this one.
    fn followed_by(self, next: FlushReport) -> FlushReport {
        let FlushReport::Done { synced: before, .. } = self else {
            return next;
        };
        match next {
            FlushReport::Done { synced, remaining } => FlushReport::Done {
                synced: before + synced,
                remaining,
            },
            FlushReport::Aborted {
                synced,
                remaining,
                reason,
            } => FlushReport::Aborted {
                synced: before + synced,
                remaining,
                reason,
            },
            FlushReport::Empty => FlushReport::Done {
                synced: before,
                remaining: 0,
            },
            FlushReport::Skipped(_) => self,
        }
    }
}

/// What to do with an operation pointing at a record that has no server id.
enum Dependency {
    /// The record is still queued; wait for it.
    Waiting,
    /// The record was sent after all; the operation now carries its server id.
    Resolved(PendingOperation),
    /// The record will never reach the server.
    Orphaned,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SyncEngine<S: KvStore, A: RemoteApi> {
    local: LocalStore<S>,
    queue: PendingQueue<S>,
    api: A,
    log: ActivityLog,
    running: Arc<AtomicBool>,
    rerun: Arc<AtomicBool>,
}

impl<S: KvStore, A: RemoteApi> SyncEngine<S, A> {
    /// `queue` must be shared with every writer of the same store.
    pub fn new(local: LocalStore<S>, queue: PendingQueue<S>, api: A, log: ActivityLog) -> Self {
        Self {
            local,
            queue,
            api,
            log,
            running: Arc::new(AtomicBool::new(false)),
            rerun: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Replay every pending operation.
    ///
    /// If a flush is already running this returns
    /// [`SkipReason::AlreadyRunning`] and the running flush makes one more
    /// pass, so operations queued in the meantime are not left behind.
    pub async fn flush(&self, ctx: &SyncContext) -> FlushReport {
        if !ctx.is_online() {
            tracing::debug!("Offline, not flushing");
            return FlushReport::Skipped(SkipReason::Offline);
        }
        // set before trying the guard so the running flush cannot miss it
        self.rerun.store(true, Ordering::SeqCst);
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Flush already running; it will go over the queue again");
            return FlushReport::Skipped(SkipReason::AlreadyRunning);
        }

        let mut report: Option<FlushReport> = None;
        loop {
            let pass = {
                let _guard = RunningGuard(&self.running);
                self.rerun.store(false, Ordering::SeqCst);
                self.flush_once(ctx).await
            };
            let combined = match report.take() {
                Some(earlier) => earlier.followed_by(pass),
                None => pass,
            };
            let finished = !matches!(combined, FlushReport::Done { .. } | FlushReport::Empty);
            if finished
                || !self.rerun.load(Ordering::SeqCst)
                || self.running.swap(true, Ordering::SeqCst)
            {
                return combined;
            }
            tracing::debug!("Changes queued during the flush, going over the queue again");
            report = Some(combined);
        }
    }

    async fn flush_once(&self, ctx: &SyncContext) -> FlushReport {
        let pending = match self.queue.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                self.log.error(&format!("Sync failed: {e}"));
                return FlushReport::Aborted {
                    synced: 0,
                    remaining: 0,
                    reason: e.to_string(),
                };
            }
        };
        if pending.is_empty() {
            return FlushReport::Empty;
        }
        let Some(token) = ctx.token() else {
            self.log.warning(&format!(
                "{} changes waiting to sync; sign in to send them",
                pending.len()
            ));
            return FlushReport::Skipped(SkipReason::SignedOut);
        };

        tracing::info!("Flushing {} pending operations", pending.len());
        let mut synced = 0;
        let mut abort = None;

        'types: for entity in EntityType::SYNC_ORDER {
            for listed in pending.iter().filter(|op| op.entity == entity) {
                // re-read: the entry may have been merged or dropped meanwhile
                let mut op = match self.queue.get(&listed.temp_id).await {
                    Ok(Some(op)) if !op.synced => op,
                    Ok(_) => continue,
                    Err(e) => {
                        abort = Some(e.to_string());
                        break 'types;
                    }
                };
                if let Some((field, target, id)) = op.unresolved_reference() {
                    match self.dependency(&op, target, &id).await {
                        Ok(Dependency::Waiting) => {
                            tracing::warn!(
                                "{} {} waits for {field} {id} to sync",
                                op.entity,
                                op.record_id
                            );
                            break;
                        }
                        Ok(Dependency::Resolved(resolved)) => op = resolved,
                        Ok(Dependency::Orphaned) => continue,
                        Err(e) => {
                            abort = Some(e.to_string());
                            break 'types;
                        }
                    }
                }
                match self.replay(&token, &op).await {
                    Ok(()) => synced += 1,
                    Err(ReplayError::Remote(ApiError::Auth(reason))) => {
                        ctx.clear_session();
                        abort = Some(format!("server refused the session: {reason}"));
                        break 'types;
                    }
                    Err(ReplayError::Storage(e)) => {
                        abort = Some(e.to_string());
                        break 'types;
                    }
                    Err(ReplayError::Remote(e)) => {
                        tracing::warn!(
                            "{:?} {} {} failed: {e}",
                            op.kind,
                            op.entity,
                            op.record_id
                        );
                        break;
                    }
                }
            }
        }

        let remaining = self
            .queue
            .len()
            .await
            .unwrap_or_else(|_| pending.len().saturating_sub(synced));
        match abort {
            Some(reason) => {
                self.log.error(&format!(
                    "Sync stopped after {synced} changes, {remaining} still pending: {reason}"
                ));
                FlushReport::Aborted {
                    synced,
                    remaining,
                    reason,
                }
            }
            None => {
                if remaining == 0 {
                    self.log.success(&format!("Synced {synced} changes"));
                } else {
                    self.log.warning(&format!(
                        "Synced {synced} changes, {remaining} still pending"
                    ));
                }
                FlushReport::Done { synced, remaining }
            }
        }
    }

    /// Flush once now, then on every reconnect and every
    /// [`request_sync`](SyncContext::request_sync). Never returns.
    pub async fn run(&self, ctx: &SyncContext) {
        let mut online = ctx.subscribe();
        self.flush(ctx).await;
        loop {
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    if is_online {
                        self.log.info("Connection restored");
                        self.flush(ctx).await;
                    } else {
                        self.log.warning("Connection lost; changes are saved locally");
                    }
                }
                _ = ctx.sync_requested() => {
                    self.flush(ctx).await;
                }
            }
        }
    }

    /// Decide what to do with `op`, which points at the unsynced `id` of a
    /// `target` record.
    async fn dependency(
        &self,
        op: &PendingOperation,
        target: EntityType,
        id: &RecordId,
    ) -> Result<Dependency, StoreError> {
        let key = PendingOperation::key_for(target, id);
        if self.queue.get(&key).await?.is_some() {
            return Ok(Dependency::Waiting);
        }
        if let Some(server_id) = self.queue.alias(target, id).await? {
            self.queue.remap_reference(target, id, &server_id).await?;
            self.remap_cached(target, id, &server_id).await?;
            return Ok(match self.queue.get(&op.temp_id).await? {
                Some(current) => Dependency::Resolved(current),
                None => Dependency::Orphaned,
            });
        }
        if self.queue.confirm(op).await? {
            self.local.delete_value(op.entity, &op.record_id).await?;
        }
        self.log.warning(&format!(
            "Discarded a {} change: the {target} it belongs to was deleted before it was sent",
            op.entity
        ));
        Ok(Dependency::Orphaned)
    }

    async fn replay(&self, token: &str, op: &PendingOperation) -> Result<(), ReplayError> {
        match op.kind {
            OpKind::Create => self.replay_create(token, op).await,
            OpKind::Update => self.replay_update(token, op).await,
            OpKind::Delete => self.replay_delete(token, op).await,
        }
    }

    async fn replay_create(&self, token: &str, op: &PendingOperation) -> Result<(), ReplayError> {
        let mut body = op.payload.clone();
        if let Some(fields) = body.as_object_mut() {
            fields.remove("id");
        }
        let created = self.api.create(token, op.entity, &body).await?;
        let server_id = RecordId::from_value(&created)
            .filter(|id| !id.is_temp())
            .ok_or_else(|| ApiError::Decode("created record has no server id".to_string()))?;
        tracing::debug!("{} {} is now {server_id}", op.entity, op.record_id);

        let confirmation = self.queue.confirm_create(op, &server_id).await?;
        self.local.delete_value(op.entity, &op.record_id).await?;
        match confirmation {
            CreateConfirmation::Confirmed => {
                self.local
                    .put_value(op.entity, &server_id, created)
                    .await?
            }
            CreateConfirmation::Superseded(next) => {
                self.local
                    .put_value(op.entity, &server_id, next.payload)
                    .await?
            }
            CreateConfirmation::Deleted => {}
        }

        self.queue
            .remap_reference(op.entity, &op.record_id, &server_id)
            .await?;
        self.remap_cached(op.entity, &op.record_id, &server_id)
            .await?;
        Ok(())
    }

    async fn replay_update(&self, token: &str, op: &PendingOperation) -> Result<(), ReplayError> {
        let response = match self
            .api
            .update(token, op.entity, &op.record_id, &op.payload)
            .await
        {
            Ok(response) => response,
            Err(ApiError::NotFound) => {
                // deleted on the server; nothing left to update
                tracing::warn!("{} {} no longer exists on the server", op.entity, op.record_id);
                if self.queue.confirm(op).await? {
                    self.local.delete_value(op.entity, &op.record_id).await?;
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if self.queue.confirm(op).await? {
            let record = if response.is_object() {
                response
            } else {
                op.payload.clone()
            };
            self.local.put_value(op.entity, &op.record_id, record).await?;
        }
        Ok(())
    }

    async fn replay_delete(&self, token: &str, op: &PendingOperation) -> Result<(), ReplayError> {
        match self.api.delete(token, op.entity, &op.record_id).await {
            Ok(()) | Err(ApiError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        if self.queue.confirm(op).await? {
            self.local.delete_value(op.entity, &op.record_id).await?;
        }
        Ok(())
    }

    /// Rewrite cached records that point at `from`.
    async fn remap_cached(
        &self,
        target: EntityType,
        from: &RecordId,
        to: &RecordId,
    ) -> Result<(), StoreError> {
        let from_value = serde_json::to_value(from)?;
        let to_value = serde_json::to_value(to)?;
        for entity in EntityType::SYNC_ORDER {
            for (field, referenced) in entity.references() {
                if *referenced != target {
                    continue;
                }
                for mut record in self.local.values(entity).await? {
                    if record.get(*field) != Some(&from_value) {
                        continue;
                    }
                    let Some(id) = RecordId::from_value(&record) else {
                        continue;
                    };
                    record[*field] = to_value.clone();
                    self.local.put_value(entity, &id, record).await?;
                }
            }
        }
        Ok(())
    }
}
