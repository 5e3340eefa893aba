//! Config file watcher for hot reload.
//!
//! Editors tend to save in several steps (truncate, write, rename), each
//! raising its own notify event. Events are collected on a channel and
//! coalesced until the file has been quiet for [`DEBOUNCE`], so one save
//! parses and applies the file once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time;

use crate::config::loader::load_config;
use crate::config::schema::BalancerConfig;

/// Quiet period that ends a burst of file events.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Watches one config file and emits each successfully parsed version.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<BalancerConfig>,
    debounce: Duration,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver parsed configs arrive on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<BalancerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
                debounce: DEBOUNCE,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a tokio runtime; the returned
    /// handle must be kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if triggers_reload(&event.kind) => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");

        let Self {
            path,
            update_tx,
            debounce,
        } = self;
        tokio::spawn(async move {
            while let Some(events) = next_batch(&mut event_rx, debounce).await {
                tracing::info!(path = ?path, events, "Config file change detected, reloading");
                match load_config(&path) {
                    Ok(config) => {
                        if update_tx.send(config).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(
                        error = %e,
                        "Failed to reload config, keeping current configuration"
                    ),
                }
            }
            tracing::debug!("Config watcher stopped");
        });

        Ok(watcher)
    }
}

fn triggers_reload(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}

/// Wait for an event, then keep absorbing events until none arrives for
/// `window`. Returns how many were absorbed, or `None` once the sender is
/// gone.
async fn next_batch(rx: &mut mpsc::UnboundedReceiver<()>, window: Duration) -> Option<usize> {
    rx.recv().await?;
    let mut events = 1;
    while let Ok(Some(())) = time::timeout(window, rx.recv()).await {
        events += 1;
    }
    Some(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[tokio::test]
    async fn burst_of_events_is_one_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..3 {
            tx.send(()).unwrap();
        }
        assert_eq!(next_batch(&mut rx, Duration::from_millis(50)).await, Some(3));
    }

    #[tokio::test]
    async fn quiet_gap_splits_batches() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = tokio::spawn(async move {
            tx.send(()).unwrap();
            tx.send(()).unwrap();
            time::sleep(Duration::from_millis(200)).await;
            tx.send(()).unwrap();
        });

        let window = Duration::from_millis(50);
        assert_eq!(next_batch(&mut rx, window).await, Some(2));
        assert_eq!(next_batch(&mut rx, window).await, Some(1));
        sender.await.unwrap();
        assert_eq!(next_batch(&mut rx, window).await, None);
    }

    #[test]
    fn only_writes_and_creates_trigger() {
        assert!(triggers_reload(&EventKind::Modify(ModifyKind::Any)));
        assert!(triggers_reload(&EventKind::Create(CreateKind::File)));
        assert!(!triggers_reload(&EventKind::Access(AccessKind::Any)));
        assert!(!triggers_reload(&EventKind::Remove(RemoveKind::File)));
    }

    #[tokio::test]
    async fn saved_file_is_reloaded_once() {
        let dir = std::env::temp_dir().join(format!("tcp-balancer-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("balancer.toml");
        std::fs::write(&path, "[[backends]]\naddress = \"127.0.0.1:9000\"\n").unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _handle = watcher.with_debounce(Duration::from_millis(100)).run().unwrap();
        time::sleep(Duration::from_millis(100)).await;

        std::fs::write(&path, "[[backends]]\naddress = \"127.0.0.1:9001\"\n").unwrap();
        std::fs::write(&path, "[[backends]]\naddress = \"127.0.0.1:9002\"\n").unwrap();

        let config = time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("no reload after write")
            .unwrap();
        assert_eq!(config.backends[0].address, "127.0.0.1:9002");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
