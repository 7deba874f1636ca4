//! Background tasks.
//!
//! Currently one task: the liveness sweeper that evicts participants whose
//! heartbeats have gone stale. The sweep runs on a fixed interval and stops
//! when the shutdown token fires.

use crate::errors::CsError;
use crate::hub::e2ee::E2eeRateLimiter;
use crate::hub::protocol::{leave_reason, ServerMessage};
use crate::hub::relay::SignalingRelay;
use crate::liveness::HeartbeatTracker;
use crate::observability::metrics;
use crate::registry::{ConnectionRegistry, RoomMembership};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared pieces the sweeper needs to tear a zombie down.
#[derive(Clone)]
pub struct SweeperContext {
    pub registry: ConnectionRegistry,
    pub rooms: RoomMembership,
    pub heartbeats: HeartbeatTracker,
    pub relay: SignalingRelay,
    pub rate_limiter: E2eeRateLimiter,
}

/// Run the liveness sweep loop until `shutdown` is cancelled.
///
/// `close_participant` persists the eviction (marks the participant row as
/// left). It is a closure so the loop stays testable without a database.
/// When persistence fails the tracker entry is kept, so the participant is
/// retried on the next sweep instead of silently leaking an open row.
pub async fn run_liveness_sweeper<F, Fut>(
    ctx: SweeperContext,
    heartbeat_timeout: Duration,
    sweep_interval: Duration,
    shutdown: CancellationToken,
    close_participant: F,
) where
    F: Fn(Uuid, Uuid) -> Fut,
    Fut: Future<Output = Result<u64, CsError>>,
{
    tracing::info!(
        target: "cs.tasks",
        timeout_seconds = heartbeat_timeout.as_secs(),
        interval_seconds = sweep_interval.as_secs(),
        "Liveness sweeper started"
    );

    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(target: "cs.tasks", "Liveness sweeper stopping");
                return;
            }
            _ = ticker.tick() => {
                sweep_once(&ctx, heartbeat_timeout, &close_participant).await;
                ctx.rate_limiter.prune();
            }
        }
    }
}

/// One sweep pass: evict every participant whose heartbeat is stale.
async fn sweep_once<F, Fut>(ctx: &SweeperContext, timeout: Duration, close_participant: &F)
where
    F: Fn(Uuid, Uuid) -> Fut,
    Fut: Future<Output = Result<u64, CsError>>,
{
    let expired = ctx.heartbeats.expired(timeout);
    if expired.is_empty() {
        return;
    }

    tracing::warn!(
        target: "cs.tasks",
        count = expired.len(),
        "Evicting participants with stale heartbeats"
    );

    for zombie in expired {
        // Persist first. If the database write fails the tracker entry
        // stays, and the next sweep retries the eviction.
        if let Err(e) = close_participant(zombie.session_id, zombie.user_id).await {
            tracing::error!(
                target: "cs.tasks",
                session_id = %zombie.session_id,
                user_id = %zombie.user_id,
                error = %e,
                "Eviction persistence failed, will retry"
            );
            metrics::record_eviction("retry");
            continue;
        }

        if let Some(room_id) = &zombie.room_id {
            ctx.relay
                .broadcast(
                    room_id,
                    Some(zombie.user_id),
                    ServerMessage::UserLeft {
                        room_id: room_id.clone(),
                        user_id: zombie.user_id,
                        reason: leave_reason::EVICTED,
                    },
                )
                .await;
            ctx.rooms.leave(room_id, zombie.user_id);
        }

        // Guarded unbind: only drop the registry slot if the zombie's
        // connection still owns it. A fresh reconnect keeps its slot.
        ctx.registry.unbind(zombie.user_id, &zombie.connection_id);
        ctx.heartbeats.remove(zombie.session_id, zombie.user_id);
        metrics::record_eviction("evicted");

        tracing::info!(
            target: "cs.tasks",
            session_id = %zombie.session_id,
            user_id = %zombie.user_id,
            connection_id = %zombie.connection_id,
            "Evicted stale participant"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_ctx() -> SweeperContext {
        let registry = ConnectionRegistry::new();
        let rooms = RoomMembership::new();
        SweeperContext {
            registry: registry.clone(),
            rooms: rooms.clone(),
            heartbeats: HeartbeatTracker::new(),
            relay: SignalingRelay::new(registry, rooms),
            rate_limiter: E2eeRateLimiter::new(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_stale_participant() {
        let ctx = test_ctx();
        let session_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();

        let (tx, _rx) = mpsc::channel(8);
        ctx.registry
            .bind(user_id, ConnectionHandle::new("conn-1".to_string(), tx));
        ctx.rooms.join("room-1", user_id);
        ctx.heartbeats
            .record(session_id, user_id, "conn-1", Some("room-1"));

        tokio::time::advance(Duration::from_secs(120)).await;

        let closed = Arc::new(AtomicUsize::new(0));
        let closed_in = Arc::clone(&closed);
        sweep_once(&ctx, Duration::from_secs(90), &move |_, _| {
            let closed = Arc::clone(&closed_in);
            async move {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        })
        .await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(ctx.registry.lookup(user_id).is_none());
        assert!(!ctx.rooms.is_member("room-1", user_id));
        assert!(ctx.heartbeats.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_retries_on_persistence_failure() {
        let ctx = test_ctx();
        let session_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();
        ctx.heartbeats.record(session_id, user_id, "conn-1", None);

        tokio::time::advance(Duration::from_secs(120)).await;

        sweep_once(&ctx, Duration::from_secs(90), &|_, _| async {
            Err(CsError::Database("connection refused".to_string()))
        })
        .await;

        // Entry kept for retry
        assert_eq!(ctx.heartbeats.len(), 1);

        sweep_once(&ctx, Duration::from_secs(90), &|_, _| async { Ok(1) }).await;
        assert!(ctx.heartbeats.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_ignores_fresh_heartbeats() {
        let ctx = test_ctx();
        ctx.heartbeats
            .record(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), "conn-1", None);

        tokio::time::advance(Duration::from_secs(30)).await;

        let closed = Arc::new(AtomicUsize::new(0));
        let closed_in = Arc::clone(&closed);
        sweep_once(&ctx, Duration::from_secs(90), &move |_, _| {
            let closed = Arc::clone(&closed_in);
            async move {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        })
        .await;

        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.heartbeats.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let ctx = test_ctx();
        let token = CancellationToken::new();
        let task = tokio::spawn(run_liveness_sweeper(
            ctx,
            Duration::from_secs(90),
            Duration::from_secs(15),
            token.clone(),
            |_, _| async { Ok(1) },
        ));

        token.cancel();
        task.await.expect("sweeper task should exit cleanly");
    }

    /// An observed disconnect (close frame or read error) tears down the
    /// socket but leaves the heartbeat entry behind. The sweep must still
    /// see the silent participant and close their row.
    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_after_observed_disconnect() {
        let ctx = test_ctx();
        let session_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();

        let (tx, _rx) = mpsc::channel(8);
        ctx.registry
            .bind(user_id, ConnectionHandle::new("conn-1".to_string(), tx));
        ctx.rooms.join("room-1", user_id);
        ctx.heartbeats
            .record(session_id, user_id, "conn-1", Some("room-1"));

        // Socket cleanup after an observed drop: unbind and leave the
        // room, but keep the heartbeat entry.
        ctx.registry.unbind(user_id, "conn-1");
        ctx.rooms.leave("room-1", user_id);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(ctx.heartbeats.expired(Duration::from_secs(90)).len(), 1);

        let closed = Arc::new(AtomicUsize::new(0));
        let closed_in = Arc::clone(&closed);
        sweep_once(&ctx, Duration::from_secs(90), &move |_, _| {
            let closed = Arc::clone(&closed_in);
            async move {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        })
        .await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(ctx.heartbeats.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_does_not_unbind_reconnected_user() {
        let ctx = test_ctx();
        let session_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();

        // Stale entry points at the old connection; the user has since
        // reconnected under a new connection id.
        ctx.heartbeats.record(session_id, user_id, "conn-old", None);
        let (tx, _rx) = mpsc::channel(8);
        ctx.registry
            .bind(user_id, ConnectionHandle::new("conn-new".to_string(), tx));

        tokio::time::advance(Duration::from_secs(120)).await;
        sweep_once(&ctx, Duration::from_secs(90), &|_, _| async { Ok(1) }).await;

        // New connection keeps its slot
        assert!(ctx.registry.lookup(user_id).is_some());
        assert!(ctx.heartbeats.is_empty());
    }
}
