use parking_lot::Mutex;
use std::{collections::HashSet, fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::events::RunEvent;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ObserverError {
    /// The observer fell behind and the channel dropped `0` events for it.
    #[error("observer lagged behind by {0} events")]
    Lagged(u64),
}

/// Fan-out of run events to whoever is connected right now. No replay.
pub struct ObserverHub {
    tx: broadcast::Sender<RunEvent>,
    observers: Arc<Mutex<HashSet<Uuid>>>,
}

impl fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHub")
            .field("observer_count", &self.observer_count())
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

impl ObserverHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, observers: Arc::default() }
    }

    pub fn connect(&self) -> Observer {
        // Subscribe before registering so the id never outlives its receiver.
        let rx = self.tx.subscribe();
        let id = Uuid::new_v4();
        self.observers.lock().insert(id);
        tracing::debug!(observer = %id, "observer connected");
        Observer { id, rx, observers: self.observers.clone() }
    }

    /// Same as dropping the observer.
    pub fn disconnect(&self, observer: Observer) {
        drop(observer);
    }

    /// Never blocks. Having nobody listening is not an error.
    pub fn broadcast(&self, event: RunEvent) {
        if event.is_terminal() {
            tracing::debug!(run_id = event.run_id(), "broadcasting terminal event");
        }
        let _ = self.tx.send(event);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

/// Registered until dropped, however the owning task ends.
pub struct Observer {
    id: Uuid,
    rx: broadcast::Receiver<RunEvent>,
    observers: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for Observer {
    fn drop(&mut self) {
        if self.observers.lock().remove(&self.id) {
            tracing::debug!(observer = %self.id, "observer disconnected");
        }
    }
}

impl Observer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event in emission order; `Ok(None)` once the hub is gone.
    pub async fn recv(&mut self) -> Result<Option<RunEvent>, ObserverError> {
        match self.rx.recv().await {
            Ok(evt) => Ok(Some(evt)),
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(ObserverError::Lagged(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(run_id: &str, line: &str) -> RunEvent {
        RunEvent::RunOutput { run_id: run_id.into(), line: line.into() }
    }

    #[tokio::test]
    async fn every_observer_gets_events_in_order() {
        let hub = ObserverHub::new(16);
        let mut a = hub.connect();
        let mut b = hub.connect();
        assert_eq!(hub.observer_count(), 2);

        for i in 0..3 {
            hub.broadcast(line("r", &i.to_string()));
        }
        for obs in [&mut a, &mut b] {
            for i in 0..3 {
                assert_eq!(obs.recv().await.unwrap(), Some(line("r", &i.to_string())));
            }
        }
    }

    #[tokio::test]
    async fn late_observer_sees_no_history() {
        let hub = ObserverHub::new(16);
        hub.broadcast(line("r", "before"));
        let mut obs = hub.connect();
        hub.broadcast(line("r", "after"));
        assert_eq!(obs.recv().await.unwrap(), Some(line("r", "after")));
    }

    #[tokio::test]
    async fn broadcast_survives_disconnects() {
        let hub = ObserverHub::new(16);
        hub.broadcast(line("r", "nobody listening"));

        let gone = hub.connect();
        let mut stays = hub.connect();
        hub.disconnect(gone);
        assert_eq!(hub.observer_count(), 1);

        hub.broadcast(line("r", "x"));
        assert_eq!(stays.recv().await.unwrap(), Some(line("r", "x")));
    }

    #[tokio::test]
    async fn dropping_an_observer_unregisters_it() {
        let hub = ObserverHub::new(4);
        let kept = hub.connect();
        let task = {
            let obs = hub.connect();
            tokio::spawn(async move {
                let mut obs = obs;
                obs.recv().await
            })
        };
        assert_eq!(hub.observer_count(), 2);

        task.abort();
        let _ = task.await;
        assert_eq!(hub.observer_count(), 1);

        drop(kept);
        assert_eq!(hub.observer_count(), 0);
    }

    #[tokio::test]
    async fn slow_observer_reports_lag() {
        let hub = ObserverHub::new(2);
        let mut slow = hub.connect();
        for i in 0..5 {
            hub.broadcast(line("r", &i.to_string()));
        }
        assert!(matches!(slow.recv().await, Err(ObserverError::Lagged(_))));
    }

    #[tokio::test]
    async fn dropped_hub_ends_stream() {
        let hub = ObserverHub::new(4);
        let mut obs = hub.connect();
        drop(hub);
        assert_eq!(obs.recv().await.unwrap(), None);
    }
}
