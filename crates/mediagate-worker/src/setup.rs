//! Worker setup
//!
//! Builds every client once and injects it into the components that need it.

use crate::queue::{QueueConsumer, QueueConsumerConfig};
use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use mediagate_core::Config;
use mediagate_db::create_coordination_store;
use mediagate_services::{
    AlertChannel, LogAlertChannel, MessageHandler, RekognitionOracle, ScanCoordinator,
    SnsAlertChannel, StaleScanSweeper, UploadModerationHandler, VideoNotificationChannel,
    VideoResultProcessor, VirusScanHandler, VirusScanner,
};
use mediagate_storage::create_object_store;
use std::sync::Arc;

const AWS_MAX_ATTEMPTS: u32 = 5;

/// Everything the worker runs.
pub struct Worker {
    pub consumers: Vec<Arc<QueueConsumer>>,
    pub sweeper: Option<Arc<StaleScanSweeper>>,
}

/// Load shared AWS configuration with adaptive retries.
pub async fn load_aws_config(config: &Config) -> SdkConfig {
    let region_provider = match config.aws_region.clone() {
        Some(region) => RegionProviderChain::first_try(Region::new(region)),
        None => RegionProviderChain::default_provider(),
    };
    let retry_config = RetryConfig::standard()
        .with_max_attempts(AWS_MAX_ATTEMPTS)
        .with_retry_mode(RetryMode::Adaptive);

    aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .retry_config(retry_config)
        .load()
        .await
}

/// Build the coordinator, handlers, queue consumers and sweep.
pub async fn initialize_worker(config: &Config) -> Result<Worker> {
    let sdk_config = load_aws_config(config).await;

    let store = create_coordination_store(config)
        .await
        .context("Failed to create coordination store")?;
    let objects =
        create_object_store(config, &sdk_config).context("Failed to create object store")?;

    let alerts: Arc<dyn AlertChannel> = match config.alert_topic_arn.clone() {
        Some(topic_arn) => {
            tracing::info!(topic_arn = %topic_arn, "Alerts published to SNS");
            Arc::new(SnsAlertChannel::new(
                aws_sdk_sns::Client::new(&sdk_config),
                topic_arn,
            ))
        }
        None => {
            tracing::warn!("ALERT_TOPIC_ARN not set, alerts are only logged");
            Arc::new(LogAlertChannel)
        }
    };

    if config.quarantine_bucket.is_none() {
        tracing::warn!("QUARANTINE_BUCKET not set, flagged objects will not be quarantined");
    }

    let coordinator = Arc::new(ScanCoordinator::new(
        store,
        objects,
        alerts,
        config.quarantine_bucket.clone(),
        config.expected_scan_count,
    ));

    let notification = match (
        config.rekognition_notification_topic_arn.clone(),
        config.rekognition_notification_role_arn.clone(),
    ) {
        (Some(topic_arn), Some(role_arn)) => Some(VideoNotificationChannel {
            topic_arn,
            role_arn,
        }),
        _ => None,
    };
    let oracle = Arc::new(RekognitionOracle::new(
        aws_sdk_rekognition::Client::new(&sdk_config),
        config.moderation_min_confidence,
        notification,
    ));

    let scanner: Option<Arc<dyn VirusScanner>> = if config.clamav.enabled {
        tracing::info!(
            host = %config.clamav.host,
            port = config.clamav.port,
            fail_closed = config.clamav.fail_closed,
            "ClamAV scanning enabled"
        );
        Some(Arc::new(mediagate_services::ClamAvScanner::new(&config.clamav)))
    } else {
        tracing::warn!("ClamAV disabled, uploads pass virus scan without scanning");
        None
    };

    let mut routes: Vec<(String, Arc<dyn MessageHandler>)> = Vec::new();
    if let Some(url) = config.worker.virus_scan_queue_url.clone() {
        let handler: Arc<dyn MessageHandler> = Arc::new(VirusScanHandler::new(
            coordinator.clone(),
            scanner,
            config.max_scan_file_size_bytes,
        ));
        routes.push((url, handler));
    }
    if let Some(url) = config.worker.upload_moderation_queue_url.clone() {
        let handler: Arc<dyn MessageHandler> = Arc::new(UploadModerationHandler::new(
            coordinator.clone(),
            oracle.clone(),
            config.video_moderation_enabled(),
        ));
        routes.push((url, handler));
    }
    if let Some(url) = config.worker.video_result_queue_url.clone() {
        let handler: Arc<dyn MessageHandler> =
            Arc::new(VideoResultProcessor::new(coordinator.clone(), oracle));
        routes.push((url, handler));
    }

    let sqs = aws_sdk_sqs::Client::new(&sdk_config);
    let consumer_config = QueueConsumerConfig {
        batch_size: config.worker.batch_size,
        wait_time_secs: config.worker.wait_time_secs,
        max_concurrent_batches: config.worker.max_concurrent_batches,
    };
    let consumers = routes
        .into_iter()
        .map(|(url, handler)| {
            Arc::new(QueueConsumer::new(
                sqs.clone(),
                url,
                handler,
                consumer_config.clone(),
            ))
        })
        .collect::<Vec<_>>();

    let sweeper = if config.sweep.enabled() {
        tracing::info!(
            interval_secs = config.sweep.interval_secs,
            threshold_secs = config.sweep.threshold_secs,
            policy = ?config.sweep.policy,
            "Stale scan sweep enabled"
        );
        Some(Arc::new(StaleScanSweeper::new(
            coordinator,
            config.sweep.clone(),
        )))
    } else {
        None
    };

    Ok(Worker { consumers, sweeper })
}
