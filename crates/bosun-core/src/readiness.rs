//! Bounded readiness waits shared by every hook.
//!
//! Each wait polls until its condition holds, the deadline passes, or the
//! [`CancelToken`] fires. A timeout reports the last observation so "not up
//! yet" can be told apart from "up but answering wrong".

use crate::concurrency::CancelToken;
use serde::Deserialize;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const CANCEL_SLICE: Duration = Duration::from_millis(100);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("timed out after {}s waiting for {target} (last: {last})", elapsed.as_secs())]
    Timeout {
        target: String,
        elapsed: Duration,
        last: String,
    },
    #[error("{target} is not ready: {reason}")]
    NotReady { target: String, reason: String },
    #[error("wait for {target} cancelled")]
    Cancelled { target: String },
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub interval: Duration,
    pub cancel: CancelToken,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(2),
            cancel: CancelToken::new(),
        }
    }
}

impl WaitOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Run `attempt` until it succeeds. `NotReady` from an attempt means "try again";
/// any other error ends the wait.
pub fn poll_until<T>(
    target: &str,
    opts: &WaitOptions,
    mut attempt: impl FnMut() -> Result<T, ReadinessError>,
) -> Result<T, ReadinessError> {
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        if opts.cancel.is_cancelled() {
            return Err(ReadinessError::Cancelled {
                target: target.to_owned(),
            });
        }
        attempts += 1;
        let last = match attempt() {
            Ok(value) => {
                info!("{target} ready after {attempts} attempt(s)");
                return Ok(value);
            }
            Err(ReadinessError::NotReady { reason, .. }) => reason,
            Err(other) => return Err(other),
        };
        debug!("{target} not ready (attempt {attempts}): {last}");

        let elapsed = start.elapsed();
        if elapsed >= opts.timeout {
            return Err(ReadinessError::Timeout {
                target: target.to_owned(),
                elapsed,
                last,
            });
        }
        let pause = opts.interval.min(opts.timeout - elapsed);
        let resume = Instant::now() + pause;
        while Instant::now() < resume {
            if opts.cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled {
                    target: target.to_owned(),
                });
            }
            std::thread::sleep(CANCEL_SLICE.min(resume.saturating_duration_since(Instant::now())));
        }
    }
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn not_ready(target: &str, reason: impl Into<String>) -> ReadinessError {
    ReadinessError::NotReady {
        target: target.to_owned(),
        reason: reason.into(),
    }
}

/// One GET. Returns the status code and body; connection failures are `NotReady`.
fn http_get(agent: &ureq::Agent, url: &str) -> Result<(u16, String), ReadinessError> {
    match agent.get(url).call() {
        Ok(resp) => {
            let code = resp.status().as_u16();
            let mut body = String::new();
            resp.into_body()
                .into_reader()
                .read_to_string(&mut body)
                .map_err(|e| not_ready(url, format!("HTTP {code}, unreadable body: {e}")))?;
            Ok((code, body))
        }
        Err(ureq::Error::StatusCode(code)) => Ok((code, String::new())),
        Err(e) => Err(not_ready(url, e.to_string())),
    }
}

fn wait_for_status(
    url: &str,
    opts: &WaitOptions,
    accept: impl Fn(u16) -> bool,
) -> Result<u16, ReadinessError> {
    let agent = agent(PROBE_TIMEOUT.min(opts.timeout.max(Duration::from_millis(1))));
    poll_until(url, opts, || {
        let (code, _) = http_get(&agent, url)?;
        if accept(code) {
            Ok(code)
        } else {
            Err(not_ready(url, format!("HTTP {code}")))
        }
    })
}

/// Wait until `url` answers 2xx.
pub fn wait_for_http(url: &str, opts: &WaitOptions) -> Result<u16, ReadinessError> {
    wait_for_status(url, opts, |code| (200..300).contains(&code))
}

/// Wait until `url` answers anything in 2xx–4xx. A 401 or 403 still proves
/// the service is listening.
pub fn wait_for_http_tolerant(url: &str, opts: &WaitOptions) -> Result<u16, ReadinessError> {
    wait_for_status(url, opts, |code| (200..500).contains(&code))
}

/// Wait until a TCP connect to `addr` (`host:port`) succeeds.
pub fn wait_for_tcp(addr: &str, opts: &WaitOptions) -> Result<(), ReadinessError> {
    poll_until(addr, opts, || {
        let resolved = addr
            .to_socket_addrs()
            .map_err(|e| not_ready(addr, format!("resolve: {e}")))?;
        let mut last = String::from("no addresses");
        for sock in resolved {
            match TcpStream::connect_timeout(&sock, PROBE_TIMEOUT) {
                Ok(_) => return Ok(()),
                Err(e) => last = e.to_string(),
            }
        }
        Err(not_ready(addr, last))
    })
}

#[derive(Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    issuer: String,
}

/// Wait until the OpenID discovery document at `url` names a non-empty
/// `issuer`. A bare 200 does not count: the identity provider serves the
/// route before it has finished creating the app's provider. Returns the
/// issuer.
pub fn wait_for_sso(url: &str, opts: &WaitOptions) -> Result<String, ReadinessError> {
    let agent = agent(PROBE_TIMEOUT.min(opts.timeout.max(Duration::from_millis(1))));
    poll_until(url, opts, || {
        let (code, body) = http_get(&agent, url)?;
        if !(200..300).contains(&code) {
            return Err(not_ready(url, format!("HTTP {code}")));
        }
        let doc: DiscoveryDocument = serde_json::from_str(&body)
            .map_err(|e| not_ready(url, format!("HTTP {code} without a discovery document: {e}")))?;
        if doc.issuer.trim().is_empty() {
            return Err(not_ready(url, format!("HTTP {code} with empty issuer")));
        }
        Ok(doc.issuer)
    })
}

/// Single non-blocking guess at whether the app has SSO configured.
///
/// Anything but a 404 or a connection failure counts as "has SSO". This is a
/// heuristic for contexts without the app record; prefer the record's
/// integration config when it is available.
pub fn sso_available(url: &str) -> bool {
    match http_get(&agent(PROBE_TIMEOUT), url) {
        Ok((404, _)) | Err(_) => false,
        Ok(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(timeout_ms: u64) -> WaitOptions {
        WaitOptions::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn poll_returns_first_success() {
        let calls = Cell::new(0);
        let v = poll_until("thing", &quick(1000), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(not_ready("thing", "warming up"))
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(v, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn poll_timeout_keeps_last_observation() {
        let err = poll_until::<()>("thing", &quick(50), || Err(not_ready("thing", "HTTP 503")))
            .unwrap_err();
        match err {
            ReadinessError::Timeout { target, last, .. } => {
                assert_eq!(target, "thing");
                assert_eq!(last, "HTTP 503");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn poll_honors_cancellation() {
        let opts = quick(10_000);
        opts.cancel.cancel();
        let err = poll_until::<()>("thing", &opts, || Ok(())).unwrap_err();
        assert!(matches!(err, ReadinessError::Cancelled { .. }));
    }

    #[test]
    fn cancellation_interrupts_sleep() {
        let opts = WaitOptions::new(Duration::from_secs(30), Duration::from_secs(10));
        let cancel = opts.cancel.clone();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });
        let start = Instant::now();
        let err =
            poll_until::<()>("slow", &opts, || Err(not_ready("slow", "nope"))).unwrap_err();
        killer.join().unwrap();
        assert!(matches!(err, ReadinessError::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn hard_errors_end_the_wait() {
        let err = poll_until::<()>("x", &quick(1000), || {
            Err(ReadinessError::Cancelled {
                target: "x".to_owned(),
            })
        })
        .unwrap_err();
        assert!(matches!(err, ReadinessError::Cancelled { .. }));
    }

    #[test]
    fn tcp_wait_succeeds_on_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        wait_for_tcp(&addr, &quick(1000)).unwrap();
    }

    #[test]
    fn tcp_wait_times_out_on_closed_port() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().to_string()
        };
        let err = wait_for_tcp(&addr, &quick(100)).unwrap_err();
        assert!(matches!(err, ReadinessError::Timeout { .. }));
    }
}
