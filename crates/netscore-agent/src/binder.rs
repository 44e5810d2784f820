//! TCP binder for recommendation services.
//!
//! Each provider may configure a `service_addr`. Binding spawns a task that
//! keeps a TCP connection to that address open, reporting every transition
//! through the [`ConnectionNotifier`], and reconnects with exponential
//! backoff until the endpoint is unbound.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use netscore_common::models::EndpointId;
use netscore_core::config::{BinderConfig, ServiceConfig};
use netscore_core::{ConnectionNotifier, ServiceBinder};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;

pub struct TcpServiceBinder {
    runtime: Handle,
    addrs: HashMap<String, String>,
    backoff: BinderConfig,
    active: Mutex<HashMap<EndpointId, watch::Sender<bool>>>,
}

impl TcpServiceBinder {
    pub fn new(runtime: Handle, config: &ServiceConfig) -> Self {
        let addrs = config
            .providers
            .iter()
            .filter_map(|p| Some((p.package.clone(), p.service_addr.clone()?)))
            .collect();
        Self {
            runtime,
            addrs,
            backoff: config.binder.clone(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_bound(&self, endpoint: &EndpointId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(endpoint)
    }
}

impl ServiceBinder for TcpServiceBinder {
    fn bind(&self, endpoint: &EndpointId, notifier: ConnectionNotifier) -> anyhow::Result<()> {
        let Some(addr) = self.addrs.get(&endpoint.package).cloned() else {
            anyhow::bail!("no service address configured for {}", endpoint.package);
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(endpoint.clone(), cancel_tx);
        if let Some(previous) = previous {
            let _ = previous.send(true);
        }

        tracing::info!(endpoint = %endpoint, addr = %addr, "binding recommendation service");
        self.runtime.spawn(maintain_connection(
            endpoint.clone(),
            addr,
            self.backoff.clone(),
            notifier,
            cancel_rx,
        ));
        Ok(())
    }

    fn unbind(&self, endpoint: &EndpointId) -> anyhow::Result<()> {
        let Some(cancel) = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(endpoint)
        else {
            anyhow::bail!("{endpoint} is not bound");
        };
        let _ = cancel.send(true);
        tracing::info!(endpoint = %endpoint, "unbound recommendation service");
        Ok(())
    }
}

/// Connect/reconnect loop for one binding. Exits once cancelled.
async fn maintain_connection(
    endpoint: EndpointId,
    addr: String,
    config: BinderConfig,
    notifier: ConnectionNotifier,
    mut cancel: watch::Receiver<bool>,
) {
    let mut backoff = config.initial_backoff;

    loop {
        if *cancel.borrow() {
            break;
        }

        let attempt = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr));
        let stream = tokio::select! {
            result = attempt => result,
            _ = cancel.changed() => break,
        };

        match stream {
            Ok(Ok(mut stream)) => {
                tracing::info!(
                    endpoint = %endpoint,
                    addr = %addr,
                    "recommendation service connected"
                );
                backoff = config.initial_backoff;
                if !notifier.connected() {
                    break;
                }
                tokio::select! {
                    reason = wait_for_close(&mut stream) => {
                        tracing::warn!(
                            endpoint = %endpoint,
                            reason = %reason,
                            "recommendation service disconnected"
                        );
                        if !notifier.disconnected() {
                            break;
                        }
                    }
                    _ = cancel.changed() => break,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %endpoint, addr = %addr, error = %e, "connect failed");
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint, addr = %addr, "connect timed out");
            }
        }

        tracing::debug!(
            endpoint = %endpoint,
            backoff_ms = backoff.as_millis() as u64,
            "reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel.changed() => break,
        }
        backoff = next_backoff(backoff, config.max_backoff);
    }

    tracing::debug!(endpoint = %endpoint, "binding task stopped");
}

/// Drain the stream until the peer goes away.
async fn wait_for_close(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return "eof".into(),
            Ok(_) => continue,
            Err(e) => return e.to_string(),
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
