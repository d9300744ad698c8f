//! Background proxy health monitor
//!
//! Polls the relay's health endpoint on a fixed interval and publishes the
//! latest answer through a `watch` channel. `None` means no check has
//! completed yet.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::ProxyChannel;

/// Handle to a running health monitor
#[derive(Debug)]
pub struct ProxyHealthMonitor {
    health: watch::Receiver<Option<bool>>,
    task: JoinHandle<()>,
}

impl ProxyHealthMonitor {
    /// Latest health reading
    pub fn subscribe(&self) -> watch::Receiver<Option<bool>> {
        self.health.clone()
    }

    /// Stop polling
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ProxyHealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start polling `proxy` every `interval`
///
/// The first check runs immediately. The task ends when every receiver has
/// been dropped.
pub fn spawn_proxy_health_monitor(proxy: ProxyChannel, interval: Duration) -> ProxyHealthMonitor {
    let (tx, rx) = watch::channel(None);

    let task = tokio::spawn(async move {
        loop {
            let healthy = proxy.check_health().await;
            let changed = *tx.borrow() != Some(healthy);
            if changed {
                tracing::debug!(healthy, base_url = proxy.base_url(), "Proxy health changed");
            }
            if tx.send(Some(healthy)).is_err() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
    });

    ProxyHealthMonitor { health: rx, task }
}
