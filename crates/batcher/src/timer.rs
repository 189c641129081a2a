//! Tokio-backed timer service

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, FlushRequest, TimerService};
use tokio::sync::mpsc;
use tracing::trace;

/// One sleeping task per scheduled request; due requests come out of the
/// receiver returned by `new`.
///
/// Scheduling fails once that receiver is dropped. Requests already sleeping
/// at that point are discarded when they wake.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    fired: mpsc::UnboundedSender<FlushRequest>,
    pending: Arc<AtomicUsize>,
}

impl TokioTimer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FlushRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer = Self {
            fired: tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };
        (timer, rx)
    }

    /// Requests scheduled and not yet due.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

impl TimerService for TokioTimer {
    async fn schedule(&self, request: FlushRequest, delay: Duration) -> Result<(), ContractError> {
        if self.fired.is_closed() {
            return Err(ContractError::timer_rejected(&request, "timer loop stopped"));
        }

        let fired = self.fired.clone();
        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.fetch_sub(1, Ordering::Relaxed);
            trace!(request = %request, "Flush timer due");
            // Receiver gone means the engine shut down.
            let _ = fired.send(request);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (timer, mut fired) = TokioTimer::new();
        let request = FlushRequest::new("k".into(), 3);

        timer
            .schedule(request.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(timer.pending(), 1);

        let started = tokio::time::Instant::now();
        let got = fired.recv().await.unwrap();
        assert_eq!(got, request);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_follows_deadline() {
        let (timer, mut fired) = TokioTimer::new();
        timer
            .schedule(FlushRequest::new("slow".into(), 0), Duration::from_millis(200))
            .await
            .unwrap();
        timer
            .schedule(FlushRequest::new("fast".into(), 0), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(fired.recv().await.unwrap().key, "fast");
        assert_eq!(fired.recv().await.unwrap().key, "slow");
    }

    #[tokio::test]
    async fn test_rejects_after_receiver_dropped() {
        let (timer, fired) = TokioTimer::new();
        drop(fired);
        let err = timer
            .schedule(FlushRequest::new("k".into(), 0), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::TimerRejected { .. }));
    }
}
