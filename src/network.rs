//! Backend discovery: candidate URL generation, health probing, resolution.

use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};

pub const BACKEND_PORT: &str = "5000";
const ANDROID_EMULATOR_HOST: &str = "10.0.2.2";
/// LAN addresses the backend has been seen on; tried after the detected IP.
const FALLBACK_HOSTS: &[&str] = &["10.171.201.130", "192.168.1.5"];
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime environment the app is executing in. Drives candidate ordering:
/// emulators need the host-loopback alias, simulators and web can use localhost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    AndroidEmulator,
    IosSimulator,
    Web,
    Device,
}

/// How the dev-server host address was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionMethod {
    HostHint,
    EnvOverride,
    Default,
}

#[derive(Clone, Debug)]
pub struct NetworkInfo {
    pub host_ip: String,
    pub host_port: String,
    pub detection: DetectionMethod,
    pub candidates: Vec<String>,
}

/// Outcome of a single liveness probe. Never produced by a panic or an Err:
/// every transport or body failure lands here as `succeeded: false`.
#[derive(Clone, Debug)]
pub struct ProbeResult {
    pub url: String,
    pub succeeded: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub detection: DetectionMethod,
    pub latency_ms: u64,
}

/// Every candidate failed. Carries the first candidate's failure (the most
/// representative diagnostic) plus the full list that was tried.
#[derive(Clone, Debug)]
pub struct ResolutionFailure {
    pub first: ProbeResult,
    pub candidates: Vec<String>,
}

impl std::fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no backend reachable ({} candidates tried, first error: {})",
            self.candidates.len(),
            self.first.error.as_deref().unwrap_or("unknown error")
        )
    }
}

fn api_base(host: &str) -> String {
    format!("http://{}:{}/api", host, BACKEND_PORT)
}

/// Ordered, deduplicated backend base URLs for a platform, most likely first.
/// Pure: no I/O, deterministic for a given input. A detected IP of
/// localhost/loopback is treated as "nothing detected" so no redundant or
/// malformed entry is emitted.
pub fn generate_candidates(platform: Platform, detected_ip: Option<&str>) -> Vec<String> {
    let detected =
        detected_ip.filter(|ip| !ip.is_empty() && *ip != "localhost" && *ip != "127.0.0.1");
    let mut urls: Vec<String> = Vec::new();
    match platform {
        Platform::AndroidEmulator => {
            urls.push(api_base(ANDROID_EMULATOR_HOST));
            if let Some(ip) = detected {
                urls.push(api_base(ip));
            }
            for host in FALLBACK_HOSTS {
                urls.push(api_base(host));
            }
            urls.push(api_base("localhost"));
            urls.push(api_base("127.0.0.1"));
        }
        Platform::IosSimulator | Platform::Web => {
            urls.push(api_base("localhost"));
            if let Some(ip) = detected {
                urls.push(api_base(ip));
            }
        }
        Platform::Device => {
            if let Some(ip) = detected {
                urls.push(api_base(ip));
            }
            for host in FALLBACK_HOSTS {
                urls.push(api_base(host));
            }
            urls.push(api_base("localhost"));
        }
    }
    let mut seen = HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
    urls
}

/// Default base URL for a platform: the top-priority candidate.
pub fn default_base_url(platform: Platform) -> String {
    generate_candidates(platform, None)
        .into_iter()
        .next()
        .unwrap_or_else(|| api_base("localhost"))
}

/// Parse the dev-server host hint ("ip:port") and build the candidate list.
/// Pure; the hint usually comes from framework runtime metadata.
pub fn detect_network(platform: Platform, host_hint: Option<&str>) -> NetworkInfo {
    let mut host_ip = "localhost".to_string();
    let mut host_port = "8081".to_string();
    let mut detection = DetectionMethod::Default;
    if let Some(hint) = host_hint {
        if let Some((ip, port)) = hint.split_once(':') {
            if !ip.trim().is_empty() && !port.trim().is_empty() {
                host_ip = ip.trim().to_string();
                host_port = port.trim().to_string();
                detection = DetectionMethod::HostHint;
            }
        }
    }
    let candidates = generate_candidates(platform, Some(&host_ip));
    NetworkInfo {
        host_ip,
        host_port,
        detection,
        candidates,
    }
}

/// Single GET against `{base}/health` with a bounded wait. Latency is measured
/// wall-clock from call start; a 2xx status with an unparseable body is still
/// a failure, not an Err.
pub async fn probe(http: &reqwest::Client, base_url: &str) -> ProbeResult {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let started = Instant::now();
    log::debug!("probing {}", url);
    let response = http
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(PROBE_TIMEOUT)
        .send()
        .await;
    let latency_ms = started.elapsed().as_millis() as u64;
    let base = base_url.to_string();
    match response {
        Ok(r) => {
            let status = r.status();
            if status.is_success() {
                match r.json::<Value>().await {
                    Ok(payload) => ProbeResult {
                        url: base,
                        succeeded: true,
                        status: Some(status.as_u16()),
                        latency_ms,
                        payload: Some(payload),
                        error: None,
                    },
                    Err(e) => ProbeResult {
                        url: base,
                        succeeded: false,
                        status: Some(status.as_u16()),
                        latency_ms,
                        payload: None,
                        error: Some(format!("invalid health body: {}", e)),
                    },
                }
            } else {
                let code = status.as_u16();
                let body = r.text().await.unwrap_or_default();
                ProbeResult {
                    url: base,
                    succeeded: false,
                    status: Some(code),
                    latency_ms,
                    payload: None,
                    error: Some(format!("HTTP {}: {}", code, body.trim())),
                }
            }
        }
        Err(e) => ProbeResult {
            url: base,
            succeeded: false,
            status: None,
            latency_ms,
            payload: None,
            error: Some(e.to_string()),
        },
    }
}

/// Sequential first-success resolution over an arbitrary prober. One probe's
/// completion gates the next; nothing is probed after the first success.
pub async fn resolve_with<P, Fut>(
    candidates: &[String],
    detection: DetectionMethod,
    mut probe_fn: P,
) -> Result<ResolvedEndpoint, ResolutionFailure>
where
    P: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ProbeResult>,
{
    let mut first_failure: Option<ProbeResult> = None;
    for url in candidates {
        let result = probe_fn(url.clone()).await;
        if result.succeeded {
            log::info!("backend reachable at {} ({} ms)", url, result.latency_ms);
            return Ok(ResolvedEndpoint {
                base_url: url.clone(),
                detection,
                latency_ms: result.latency_ms,
            });
        }
        log::warn!(
            "backend candidate {} failed: {}",
            url,
            result.error.as_deref().unwrap_or("unknown error")
        );
        if first_failure.is_none() {
            first_failure = Some(result);
        }
    }
    Err(ResolutionFailure {
        first: first_failure.unwrap_or_else(|| ProbeResult {
            url: String::new(),
            succeeded: false,
            status: None,
            latency_ms: 0,
            payload: None,
            error: Some("no candidate URLs".to_string()),
        }),
        candidates: candidates.to_vec(),
    })
}

/// Find a live backend for this platform. Each invocation is independent;
/// re-run at startup or from a manual "test connection" action. The
/// `NUTRICHAT_BASE_URL` env var short-circuits discovery entirely.
pub async fn resolve(
    http: &reqwest::Client,
    platform: Platform,
    host_hint: Option<&str>,
) -> Result<ResolvedEndpoint, ResolutionFailure> {
    if let Ok(override_url) = std::env::var("NUTRICHAT_BASE_URL") {
        let s = override_url.trim().trim_end_matches('/').to_string();
        if !s.is_empty() {
            return Ok(ResolvedEndpoint {
                base_url: s,
                detection: DetectionMethod::EnvOverride,
                latency_ms: 0,
            });
        }
    }
    let info = detect_network(platform, host_hint);
    log::info!(
        "resolving backend: platform {:?}, host {} ({:?}), {} candidates",
        platform,
        info.host_ip,
        info.detection,
        info.candidates.len()
    );
    resolve_with(&info.candidates, info.detection, |url| async move {
        probe(http, &url).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ALL_PLATFORMS: &[Platform] = &[
        Platform::AndroidEmulator,
        Platform::IosSimulator,
        Platform::Web,
        Platform::Device,
    ];

    fn ok_probe(url: &str) -> ProbeResult {
        ProbeResult {
            url: url.to_string(),
            succeeded: true,
            status: Some(200),
            latency_ms: 3,
            payload: None,
            error: None,
        }
    }

    fn failed_probe(url: &str) -> ProbeResult {
        ProbeResult {
            url: url.to_string(),
            succeeded: false,
            status: None,
            latency_ms: 1,
            payload: None,
            error: Some("connection refused".to_string()),
        }
    }

    #[test]
    fn candidates_are_deterministic_nonempty_and_deduplicated() {
        for &platform in ALL_PLATFORMS {
            for detected in [None, Some("192.168.1.77"), Some("localhost"), Some("")] {
                let a = generate_candidates(platform, detected);
                let b = generate_candidates(platform, detected);
                assert_eq!(a, b, "{:?}/{:?} must be deterministic", platform, detected);
                assert!(!a.is_empty(), "{:?}/{:?} must be non-empty", platform, detected);
                let unique: HashSet<&String> = a.iter().collect();
                assert_eq!(unique.len(), a.len(), "{:?}/{:?} has duplicates", platform, detected);
                for url in &a {
                    assert!(url.starts_with("http://"), "malformed candidate: {}", url);
                    assert!(!url.contains("http://:"), "empty host in: {}", url);
                }
            }
        }
    }

    #[test]
    fn android_emulator_prioritizes_host_loopback_alias() {
        let urls = generate_candidates(Platform::AndroidEmulator, Some("192.168.1.77"));
        assert_eq!(urls[0], "http://10.0.2.2:5000/api");
        assert_eq!(urls[1], "http://192.168.1.77:5000/api");
        assert!(urls.contains(&"http://localhost:5000/api".to_string()));
    }

    #[test]
    fn missing_detected_ip_is_omitted_not_malformed() {
        let with = generate_candidates(Platform::AndroidEmulator, Some("192.168.1.77"));
        let without = generate_candidates(Platform::AndroidEmulator, None);
        assert_eq!(with.len(), without.len() + 1);
        assert!(!without.iter().any(|u| u.contains("192.168.1.77")));
    }

    #[test]
    fn loopback_detected_ip_is_treated_as_undetected() {
        let a = generate_candidates(Platform::IosSimulator, Some("127.0.0.1"));
        let b = generate_candidates(Platform::IosSimulator, None);
        assert_eq!(a, b);
    }

    #[test]
    fn host_hint_parsing_feeds_the_candidate_list() {
        let info = detect_network(Platform::Device, Some("192.168.1.42:8081"));
        assert_eq!(info.host_ip, "192.168.1.42");
        assert_eq!(info.host_port, "8081");
        assert_eq!(info.detection, DetectionMethod::HostHint);
        assert_eq!(info.candidates[0], "http://192.168.1.42:5000/api");
    }

    #[test]
    fn bad_host_hint_falls_back_to_defaults() {
        let info = detect_network(Platform::Web, Some("not-a-host-uri"));
        assert_eq!(info.host_ip, "localhost");
        assert_eq!(info.detection, DetectionMethod::Default);
    }

    #[tokio::test]
    async fn resolve_stops_at_first_success() {
        let candidates: Vec<String> = (0..4).map(|i| format!("http://h{}:5000/api", i)).collect();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolved = resolve_with(&candidates, DetectionMethod::Default, move |url| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 2 {
                    ok_probe(&url)
                } else {
                    failed_probe(&url)
                }
            }
        })
        .await
        .expect("third candidate succeeds");
        assert_eq!(resolved.base_url, candidates[2]);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "no probe after the first success");
    }

    #[tokio::test]
    async fn resolve_failure_reports_first_candidate_and_full_list() {
        let candidates: Vec<String> = (0..4).map(|i| format!("http://h{}:5000/api", i)).collect();
        let err = resolve_with(&candidates, DetectionMethod::Default, |url| async move {
            failed_probe(&url)
        })
        .await
        .expect_err("every candidate fails");
        assert_eq!(err.first.url, candidates[0]);
        assert_eq!(err.candidates.len(), 4);
        assert_eq!(err.first.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn probe_converts_transport_failure_into_result() {
        let http = reqwest::Client::new();
        // Nothing listens on the discard port; the connection is refused.
        let result = probe(&http, "http://127.0.0.1:9/api").await;
        assert!(!result.succeeded);
        assert!(result.status.is_none());
        assert!(result.error.is_some());
    }
}
