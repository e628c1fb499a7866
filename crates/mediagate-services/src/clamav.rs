use async_trait::async_trait;
#[cfg(feature = "clamav")]
use mediagate_core::ClamAvConfig;
#[cfg(feature = "clamav")]
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Clean,
    Infected(String),
    Error(String),
}

#[async_trait]
pub trait VirusScanner: Send + Sync {
    async fn scan(&self, data: Vec<u8>) -> ScanResult;
}

#[cfg(feature = "clamav")]
/// clamd client. With `fail_closed` unset, scanner failures are reported as clean.
#[derive(Clone)]
pub struct ClamAvScanner {
    host: String,
    port: u16,
    fail_closed: bool,
    timeout_secs: u64,
}

#[cfg(feature = "clamav")]
impl ClamAvScanner {
    pub fn new(config: &ClamAvConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            fail_closed: config.fail_closed,
            timeout_secs: config.timeout_secs,
        }
    }

    fn on_failure(&self, error_msg: String) -> ScanResult {
        if self.fail_closed {
            ScanResult::Error(error_msg)
        } else {
            tracing::warn!(error = %error_msg, "ClamAV scan failed, continuing (fail-open)");
            ScanResult::Clean
        }
    }
}

#[cfg(feature = "clamav")]
/// Interpret a clamd `INSTREAM` reply such as `stream: Eicar-Signature FOUND`.
fn parse_reply(reply: &[u8]) -> Result<ScanResult, String> {
    let is_clean = clamav_client::clean(reply)
        .map_err(|e| format!("Failed to parse ClamAV response: {}", e))?;
    if is_clean {
        return Ok(ScanResult::Clean);
    }

    let text = String::from_utf8_lossy(reply);
    let text = text.trim_end_matches('\0').trim();
    match text.strip_suffix("FOUND") {
        Some(found) => {
            let signature = found
                .split_once(':')
                .map(|(_, sig)| sig)
                .unwrap_or(found)
                .trim();
            let signature = if signature.is_empty() {
                "unknown"
            } else {
                signature
            };
            Ok(ScanResult::Infected(signature.to_string()))
        }
        None => Err(format!("Unexpected ClamAV response: {}", text)),
    }
}

#[cfg(feature = "clamav")]
#[async_trait]
impl VirusScanner for ClamAvScanner {
    /// Runs the blocking client inside `spawn_blocking` under a timeout.
    async fn scan(&self, data: Vec<u8>) -> ScanResult {
        let start = Instant::now();
        let size_bytes = data.len();
        tracing::debug!(host = %self.host, port = self.port, size_bytes, "Starting ClamAV scan");

        let address = format!("{}:{}", self.host, self.port);
        let result = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            tokio::task::spawn_blocking(move || {
                let connection = clamav_client::Tcp {
                    host_address: address.as_str(),
                };
                clamav_client::scan_buffer(data.as_slice(), connection, None)
                    .map_err(|e| format!("ClamAV scan error: {}", e))
            }),
        )
        .await;

        let reply = match result {
            Ok(Ok(Ok(reply))) => reply,
            Ok(Ok(Err(error_msg))) => return self.on_failure(error_msg),
            Ok(Err(e)) => {
                let error_msg = format!("ClamAV scan task join error: {}", e);
                tracing::error!(error = %error_msg, "ClamAV scan panicked");
                return ScanResult::Error(error_msg);
            }
            Err(_) => {
                return self.on_failure(format!(
                    "ClamAV scan timeout (exceeded {} seconds)",
                    self.timeout_secs
                ))
            }
        };

        match parse_reply(&reply) {
            Ok(ScanResult::Infected(signature)) => {
                tracing::warn!(
                    duration_ms = start.elapsed().as_millis(),
                    virus = %signature,
                    "File scan detected virus"
                );
                ScanResult::Infected(signature)
            }
            Ok(result) => {
                tracing::info!(
                    duration_ms = start.elapsed().as_millis(),
                    "File scan completed: clean"
                );
                result
            }
            Err(error_msg) => self.on_failure(error_msg),
        }
    }
}
