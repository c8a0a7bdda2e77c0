//! Connectivity diagnostics backing a manual "test connection" action.

use crate::network::{detect_network, probe, NetworkInfo, Platform, ProbeResult, ResolvedEndpoint};

#[derive(Debug)]
pub struct DiagnosticsReport {
    pub info: NetworkInfo,
    /// Probe attempts in order; stops after the first success.
    pub attempts: Vec<ProbeResult>,
    pub working: Option<ResolvedEndpoint>,
}

pub async fn run_network_diagnostics(
    http: &reqwest::Client,
    platform: Platform,
    host_hint: Option<&str>,
) -> DiagnosticsReport {
    let info = detect_network(platform, host_hint);
    diagnose_with(info, |url| async move { probe(http, &url).await }).await
}

/// The diagnostics loop over an arbitrary prober: same stop-at-first-success
/// order as resolution, but the per-candidate attempts are kept for display.
pub async fn diagnose_with<P, Fut>(info: NetworkInfo, mut probe_fn: P) -> DiagnosticsReport
where
    P: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ProbeResult>,
{
    log::info!(
        "network diagnostics: host {}:{} ({:?})",
        info.host_ip,
        info.host_port,
        info.detection
    );
    for (i, url) in info.candidates.iter().enumerate() {
        log::info!("  candidate {}: {}", i + 1, url);
    }

    let mut attempts = Vec::new();
    let mut working = None;
    for url in &info.candidates {
        let result = probe_fn(url.clone()).await;
        if result.succeeded {
            log::info!("working backend: {} ({} ms)", url, result.latency_ms);
            working = Some(ResolvedEndpoint {
                base_url: url.clone(),
                detection: info.detection,
                latency_ms: result.latency_ms,
            });
            attempts.push(result);
            break;
        }
        log::info!(
            "  candidate failed: {} ({})",
            url,
            result.error.as_deref().unwrap_or("unknown error")
        );
        attempts.push(result);
    }
    if working.is_none() {
        log::warn!(
            "network diagnostics: no backend reachable after {} attempts",
            attempts.len()
        );
    }
    DiagnosticsReport {
        info,
        attempts,
        working,
    }
}
