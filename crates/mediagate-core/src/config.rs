//! Configuration module
//!
//! Every setting comes from the environment (a `.env` file is honoured in
//! development). `Config::from_env` parses with defaults and `Config::validate`
//! rejects combinations the worker cannot run with.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::SCANNER_COUNT;

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const CLAMAV_PORT: u16 = 3310;
const CLAMAV_TIMEOUT_SECS: u64 = 60;
const MAX_SCAN_FILE_SIZE_MB: u64 = 500;
const MODERATION_MIN_CONFIDENCE: f32 = 50.0;
const WORKER_MAX_CONCURRENT_BATCHES: usize = 4;
const WORKER_WAIT_TIME_SECS: i32 = 20;
const WORKER_BATCH_SIZE: i32 = 10;
const STALE_SCAN_SWEEP_INTERVAL_SECS: u64 = 3600;
const STALE_SCAN_THRESHOLD_SECS: u64 = 86_400;

/// Where scan coordination records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationBackend {
    Postgres,
    /// Process-local map; only valid for a single worker process.
    Memory,
}

impl FromStr for CoordinationBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(CoordinationBackend::Postgres),
            "memory" => Ok(CoordinationBackend::Memory),
            other => Err(anyhow::anyhow!(
                "COORDINATION_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            )),
        }
    }
}

/// What the sweep does with an object whose scans never completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    Quarantine,
    /// Tag `under_review`, alert, and stop tracking the object.
    Escalate,
}

impl FromStr for StalePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quarantine" => Ok(StalePolicy::Quarantine),
            "escalate" => Ok(StalePolicy::Escalate),
            other => Err(anyhow::anyhow!(
                "STALE_SCAN_POLICY must be 'quarantine' or 'escalate', got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClamAvConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Treat scanner errors as infections.
    pub fail_closed: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub virus_scan_queue_url: Option<String>,
    pub upload_moderation_queue_url: Option<String>,
    pub video_result_queue_url: Option<String>,
    pub max_concurrent_batches: usize,
    pub wait_time_secs: i32,
    pub batch_size: i32,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Zero disables the sweep.
    pub interval_secs: u64,
    pub threshold_secs: u64,
    pub policy: StalePolicy,
}

impl SweepConfig {
    pub fn enabled(&self) -> bool {
        self.interval_secs > 0
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn threshold(&self) -> chrono::Duration {
        let secs = i64::try_from(self.threshold_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub aws_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub quarantine_bucket: Option<String>,
    pub alert_topic_arn: Option<String>,
    pub coordination_backend: CoordinationBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub expected_scan_count: u32,
    pub clamav: ClamAvConfig,
    pub max_scan_file_size_bytes: u64,
    pub moderation_min_confidence: f32,
    pub rekognition_notification_topic_arn: Option<String>,
    pub rekognition_notification_role_arn: Option<String>,
    pub worker: WorkerConfig,
    pub sweep: SweepConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let coordination_backend = env::var("COORDINATION_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse::<CoordinationBackend>()?;

        let policy = env::var("STALE_SCAN_POLICY")
            .unwrap_or_else(|_| "quarantine".to_string())
            .parse::<StalePolicy>()?;

        let expected_scan_count = env::var("EXPECTED_SCAN_COUNT")
            .unwrap_or_else(|_| SCANNER_COUNT.to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("EXPECTED_SCAN_COUNT must be a valid number"))?;

        let max_scan_file_size_mb = env::var("MAX_SCAN_FILE_SIZE_MB")
            .unwrap_or_else(|_| MAX_SCAN_FILE_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_SCAN_FILE_SIZE_MB);

        let clamav = ClamAvConfig {
            enabled: env::var("CLAMAV_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(true),
            host: env::var("CLAMAV_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("CLAMAV_PORT")
                .unwrap_or_else(|_| CLAMAV_PORT.to_string())
                .parse()
                .unwrap_or(CLAMAV_PORT),
            fail_closed: env::var("CLAMAV_FAIL_CLOSED")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
            timeout_secs: env::var("CLAMAV_TIMEOUT_SECS")
                .unwrap_or_else(|_| CLAMAV_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CLAMAV_TIMEOUT_SECS),
        };

        let worker = WorkerConfig {
            virus_scan_queue_url: non_empty_var("VIRUS_SCAN_QUEUE_URL"),
            upload_moderation_queue_url: non_empty_var("UPLOAD_MODERATION_QUEUE_URL"),
            video_result_queue_url: non_empty_var("VIDEO_RESULT_QUEUE_URL"),
            max_concurrent_batches: env::var("WORKER_MAX_CONCURRENT_BATCHES")
                .unwrap_or_else(|_| WORKER_MAX_CONCURRENT_BATCHES.to_string())
                .parse()
                .unwrap_or(WORKER_MAX_CONCURRENT_BATCHES),
            wait_time_secs: env::var("WORKER_WAIT_TIME_SECS")
                .unwrap_or_else(|_| WORKER_WAIT_TIME_SECS.to_string())
                .parse()
                .unwrap_or(WORKER_WAIT_TIME_SECS),
            batch_size: env::var("WORKER_BATCH_SIZE")
                .unwrap_or_else(|_| WORKER_BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(WORKER_BATCH_SIZE),
        };

        let sweep = SweepConfig {
            interval_secs: env::var("STALE_SCAN_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| STALE_SCAN_SWEEP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(STALE_SCAN_SWEEP_INTERVAL_SECS),
            threshold_secs: env::var("STALE_SCAN_THRESHOLD_SECS")
                .unwrap_or_else(|_| STALE_SCAN_THRESHOLD_SECS.to_string())
                .parse()
                .unwrap_or(STALE_SCAN_THRESHOLD_SECS),
            policy,
        };

        Ok(Config {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            aws_region: non_empty_var("AWS_REGION"),
            s3_endpoint: non_empty_var("S3_ENDPOINT"),
            quarantine_bucket: non_empty_var("QUARANTINE_BUCKET"),
            alert_topic_arn: non_empty_var("ALERT_TOPIC_ARN"),
            coordination_backend,
            database_url: non_empty_var("DATABASE_URL"),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            expected_scan_count,
            clamav,
            max_scan_file_size_bytes: megabytes(max_scan_file_size_mb),
            moderation_min_confidence: env::var("MODERATION_MIN_CONFIDENCE")
                .unwrap_or_else(|_| MODERATION_MIN_CONFIDENCE.to_string())
                .parse()
                .unwrap_or(MODERATION_MIN_CONFIDENCE),
            rekognition_notification_topic_arn: non_empty_var(
                "REKOGNITION_NOTIFICATION_TOPIC_ARN",
            ),
            rekognition_notification_role_arn: non_empty_var("REKOGNITION_NOTIFICATION_ROLE_ARN"),
            worker,
            sweep,
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.expected_scan_count == 0 || self.expected_scan_count > SCANNER_COUNT {
            return Err(anyhow::anyhow!(
                "EXPECTED_SCAN_COUNT must be between 1 and {}",
                SCANNER_COUNT
            ));
        }

        match (self.coordination_backend, self.database_url.as_deref()) {
            (CoordinationBackend::Postgres, None) => {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be set when COORDINATION_BACKEND=postgres"
                ));
            }
            (CoordinationBackend::Postgres, Some(url))
                if !url.starts_with("postgres://") && !url.starts_with("postgresql://") =>
            {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
            (CoordinationBackend::Memory, _) if self.is_production() => {
                return Err(anyhow::anyhow!(
                    "COORDINATION_BACKEND=memory cannot be used in production"
                ));
            }
            _ => {}
        }

        if !(0.0..=100.0).contains(&self.moderation_min_confidence) {
            return Err(anyhow::anyhow!(
                "MODERATION_MIN_CONFIDENCE must be between 0 and 100"
            ));
        }

        if self.worker.max_concurrent_batches == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_MAX_CONCURRENT_BATCHES must be at least 1"
            ));
        }

        if !(1..=10).contains(&self.worker.batch_size) {
            return Err(anyhow::anyhow!("WORKER_BATCH_SIZE must be between 1 and 10"));
        }

        if !(0..=20).contains(&self.worker.wait_time_secs) {
            return Err(anyhow::anyhow!(
                "WORKER_WAIT_TIME_SECS must be between 0 and 20"
            ));
        }

        if self.worker.video_result_queue_url.is_some()
            || self.worker.upload_moderation_queue_url.is_some()
        {
            let video_topic = self.rekognition_notification_topic_arn.is_some();
            let video_role = self.rekognition_notification_role_arn.is_some();
            if video_topic != video_role {
                return Err(anyhow::anyhow!(
                    "REKOGNITION_NOTIFICATION_TOPIC_ARN and REKOGNITION_NOTIFICATION_ROLE_ARN must be set together"
                ));
            }
        }

        Ok(())
    }

    /// Whether asynchronous video moderation jobs can be started.
    pub fn video_moderation_enabled(&self) -> bool {
        self.rekognition_notification_topic_arn.is_some()
            && self.rekognition_notification_role_arn.is_some()
    }
}

/// Saturates so an oversized `MAX_SCAN_FILE_SIZE_MB` means "no practical limit".
fn megabytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
