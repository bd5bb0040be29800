//! The Validator (WhiteKnight, §4.8 "Verification"): runs named probes
//! against an injected target and emits Validation Results.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use ssh2::Session;

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Probe {
    TcpOpen { port: u16 },
    WeakCredentialLogin { username: String, password: String },
    HttpGet { path: String, expects_substring: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    Found,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub mission_id: String,
    pub test_name: String,
    pub outcome: ProbeOutcome,
    pub latency: Duration,
    pub evidence: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Each probe has a 30-second deadline (§4.8); exceeding it is `error`,
    /// not `not_found` — the probe itself failed to complete.
    pub fn run_probe(&self, mission_id: &str, test_name: &str, target_ip: &str, probe: &Probe, deadline: Duration) -> ValidationResult {
        let started = Instant::now();
        let outcome_and_evidence = match run_with_deadline(target_ip, probe, deadline) {
            Ok((outcome, evidence)) => (outcome, evidence),
            Err(_) => (ProbeOutcome::Error, None),
        };
        ValidationResult {
            mission_id: mission_id.to_string(),
            test_name: test_name.to_string(),
            outcome: outcome_and_evidence.0,
            latency: started.elapsed(),
            evidence: outcome_and_evidence.1,
            timestamp: Utc::now(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn run_with_deadline(target_ip: &str, probe: &Probe, deadline: Duration) -> Result<(ProbeOutcome, Option<String>), CoreError> {
    match probe {
        Probe::TcpOpen { port } => {
            let addr = format!("{target_ip}:{port}");
            match std::net::ToSocketAddrs::to_socket_addrs(&addr)
                .ok()
                .and_then(|mut addrs| addrs.next())
            {
                Some(socket_addr) => match TcpStream::connect_timeout(&socket_addr, deadline) {
                    Ok(_) => Ok((ProbeOutcome::Found, Some(format!("tcp connect to {addr} succeeded")))),
                    Err(_) => Ok((ProbeOutcome::NotFound, None)),
                },
                None => Err(CoreError::Internal(format!("could not resolve {addr}"))),
            }
        }
        Probe::WeakCredentialLogin { username, password } => {
            let tcp = TcpStream::connect_timeout(
                &format!("{target_ip}:22")
                    .parse()
                    .map_err(|_| CoreError::Internal("invalid target address".to_string()))?,
                deadline,
            )
            .map_err(|_| CoreError::Timeout("ssh connect timed out".to_string()))?;
            let mut session = Session::new().map_err(|e| CoreError::Internal(e.to_string()))?;
            session.set_tcp_stream(tcp);
            session.handshake().map_err(|e| CoreError::Internal(e.to_string()))?;
            match session.userauth_password(username, password) {
                Ok(()) => Ok((ProbeOutcome::Found, Some(format!("weak credential '{username}' accepted")))),
                Err(_) => Ok((ProbeOutcome::NotFound, None)),
            }
        }
        Probe::HttpGet { path, expects_substring } => {
            let client = reqwest::blocking::Client::builder()
                .timeout(deadline)
                .build()
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            let url = format!("http://{target_ip}{path}");
            match client.get(&url).send() {
                Ok(response) => {
                    let body = response.text().unwrap_or_default();
                    if body.contains(expects_substring.as_str()) {
                        Ok((ProbeOutcome::Found, Some(body.chars().take(256).collect())))
                    } else {
                        Ok((ProbeOutcome::NotFound, None))
                    }
                }
                Err(_) => Ok((ProbeOutcome::NotFound, None)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_probe_against_closed_port_is_not_found() {
        let validator = Validator::new();
        let result = validator.run_probe(
            "m1",
            "tcp_open_9999",
            "127.0.0.1",
            &Probe::TcpOpen { port: 1 },
            Duration::from_millis(200),
        );
        assert_eq!(result.outcome, ProbeOutcome::NotFound);
    }
}
