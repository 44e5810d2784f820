//! Local control socket.
//!
//! Newline-delimited JSON [`Envelope`]s over a Unix socket. The host feeds
//! package, setting and user events through it, and scorers and tools use
//! it to reach the public score operations. Every request is answered with
//! a `<type>.response` envelope carrying a [`ResponsePayload`].

use std::path::Path;
use std::sync::Arc;

use netscore_common::models::RecommendationRequest;
use netscore_common::protocol::{
    self, CallerPayload, Envelope, NetworkCurrentPayload, NetworkScanPayload, PackageEvent,
    ResponsePayload, ScoresRequestPayload, ScoresUpdatePayload, SettingChangedPayload,
    UserUnlockedPayload,
};
use netscore_core::Caller;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::AgentState;

/// Accept control connections until shutdown is signalled.
pub async fn run(state: Arc<AgentState>, socket_path: &Path) -> anyhow::Result<()> {
    // Stale socket from a previous run
    if socket_path.exists() {
        tokio::fs::remove_file(socket_path).await?;
    }
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(path = %socket_path.display(), "control socket listening");

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(state.clone(), stream));
                }
                Err(e) => tracing::error!(error = %e, "control socket accept failed"),
            },
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let _ = tokio::fs::remove_file(socket_path).await;
    tracing::info!("control socket closed");
    Ok(())
}

async fn serve_connection(state: Arc<AgentState>, stream: UnixStream) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut shutdown = state.shutdown.clone();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break,
        };
        let line = match line {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "control connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(reply) = handle_line(&state, &line) else {
            continue;
        };
        let mut json = match serde_json::to_string(&reply) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize control response");
                continue;
            }
        };
        json.push('\n');
        if let Err(e) = writer.write_all(json.as_bytes()).await {
            tracing::debug!(error = %e, "control connection write failed");
            break;
        }
    }
}

/// Parse one line and handle it. Unparseable lines get no reply.
pub fn handle_line(state: &AgentState, raw: &str) -> Option<Envelope> {
    match serde_json::from_str::<Envelope>(raw) {
        Ok(envelope) => Some(handle_envelope(state, &envelope)),
        Err(e) => {
            tracing::warn!(error = %e, "invalid control message");
            None
        }
    }
}

pub fn handle_envelope(state: &AgentState, envelope: &Envelope) -> Envelope {
    tracing::debug!(msg_type = %envelope.msg_type, id = %envelope.id, "control request");
    let payload = match dispatch(state, envelope) {
        Ok(data) => ResponsePayload::ok(&envelope.id, data),
        Err(e) => {
            tracing::debug!(msg_type = %envelope.msg_type, error = %e, "control request failed");
            ResponsePayload::err(&envelope.id, e)
        }
    };
    envelope.respond(payload)
}

fn dispatch(state: &AgentState, envelope: &Envelope) -> anyhow::Result<serde_json::Value> {
    let api = &state.api;
    let service = api.service();

    match envelope.msg_type.as_str() {
        protocol::PACKAGE_EVENT => {
            let event: PackageEvent = envelope.parse_payload()?;
            match &event {
                PackageEvent::Added { package } | PackageEvent::UpdateFinished { package } => {
                    state.resolver.set_installed(package, true)
                }
                PackageEvent::Removed { package } => state.resolver.set_installed(package, false),
                PackageEvent::Modified { .. } | PackageEvent::ForceStopped { .. } => {}
            }
            let evaluations = service.handle_package_event(&event);
            Ok(serde_json::json!({ "evaluations": evaluations }))
        }
        protocol::SETTING_CHANGED => {
            let p: SettingChangedPayload = envelope.parse_payload()?;
            state
                .resolver
                .set_recommendations_enabled(p.recommendations_enabled);
            let observed = service.handle_setting_changed();
            Ok(serde_json::json!({ "observed": observed }))
        }
        protocol::USER_UNLOCKED => {
            let p: UserUnlockedPayload = envelope.parse_payload()?;
            service.on_user_unlocked(p.user_id);
            Ok(serde_json::Value::Null)
        }
        protocol::SCORES_UPDATE => {
            let p: ScoresUpdatePayload = envelope.parse_payload()?;
            let accepted = api.update_scores(&Caller::from(&p.caller), &p.networks)?;
            Ok(serde_json::json!({ "accepted": accepted }))
        }
        protocol::SCORES_CLEAR => {
            let p: CallerPayload = envelope.parse_payload()?;
            let cleared = api.clear_scores(&Caller::from(&p.caller))?;
            Ok(serde_json::json!({ "cleared": cleared }))
        }
        protocol::SCORES_REQUEST => {
            let p: ScoresRequestPayload = envelope.parse_payload()?;
            let accepted = api.request_scores(&p.networks)?;
            Ok(serde_json::json!({ "accepted": accepted }))
        }
        protocol::RECOMMENDATION_REQUEST => {
            let request: Option<RecommendationRequest> = envelope.parse_payload()?;
            let result = api.request_recommendation(request.as_ref());
            Ok(serde_json::to_value(result)?)
        }
        protocol::DUMP => {
            let p: CallerPayload = envelope.parse_payload()?;
            let mut out = Vec::new();
            api.dump(&Caller::from(&p.caller), &mut out)?;
            Ok(serde_json::json!({ "text": String::from_utf8_lossy(&out) }))
        }
        protocol::CACHES_LIST => {
            let caches: Vec<_> = state.caches.iter().map(|c| c.summary()).collect();
            Ok(serde_json::to_value(caches)?)
        }
        protocol::NETWORK_CURRENT => {
            let p: NetworkCurrentPayload = envelope.parse_payload()?;
            for cache in &state.caches {
                let current = p
                    .network
                    .clone()
                    .filter(|k| k.network_type == cache.network_type());
                cache.set_current_network(current);
            }
            Ok(serde_json::Value::Null)
        }
        protocol::NETWORK_SCAN => {
            let p: NetworkScanPayload = envelope.parse_payload()?;
            for cache in &state.caches {
                cache.set_scan_results(
                    p.networks
                        .iter()
                        .filter(|k| k.network_type == cache.network_type())
                        .cloned(),
                );
            }
            Ok(serde_json::json!({ "networks": p.networks.len() }))
        }
        other => anyhow::bail!("unknown message type: {other}"),
    }
}
