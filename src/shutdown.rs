// src/shutdown.rs
//! Single shutdown signal shared by the replay loop and the janitor.

use tokio::sync::watch;

/// Owner side. Triggering is idempotent.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Listener side; cheap to clone into every task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered. Never resolves if the handle is
    /// dropped without triggering.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let (handle, mut sd) = channel();
        assert!(!sd.is_triggered());
        let waiter = tokio::spawn(async move {
            sd.wait().await;
            sd.is_triggered()
        });
        handle.trigger();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_does_not_fire() {
        let (handle, mut sd) = channel();
        drop(handle);
        let res = tokio::time::timeout(Duration::from_secs(1), sd.wait()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn late_subscriber_sees_trigger() {
        let (handle, _sd) = channel();
        handle.trigger();
        handle.trigger();
        let mut late = handle.subscribe();
        assert!(late.is_triggered());
        late.wait().await;
    }
}
