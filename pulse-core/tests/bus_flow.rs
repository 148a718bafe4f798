//! End-to-end flows through the event bus: routing, worker dispatch,
//! retry/backoff, dead-letter handling and introspection.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use pulse_core::bus::{EventBus, PublishOptions};
use pulse_core::config::BusConfig;
use pulse_core::metrics::{EventStage, LifecycleMetrics};
use pulse_core::model::{DomainEvent, JobId, JobState};
use pulse_core::{PulseError, Result};
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn post_created(post_id: &str, author_id: &str) -> DomainEvent {
    DomainEvent::PostCreated {
        post_id: post_id.to_string(),
        author_id: author_id.to_string(),
        content: "hello world".to_string(),
        media_urls: vec![],
        hashtags: vec!["#intro".to_string()],
        mentions: vec![],
        created_at: Utc::now(),
    }
}

fn share_created(share_id: &str) -> DomainEvent {
    DomainEvent::ShareCreated {
        share_id: share_id.to_string(),
        user_id: "u1".to_string(),
        content_id: "p1".to_string(),
        content_type: pulse_core::model::ContentKind::Post,
        shared_at: Utc::now(),
    }
}

fn like_added(like_id: &str) -> DomainEvent {
    DomainEvent::LikeAdded {
        like_id: like_id.to_string(),
        user_id: "u1".to_string(),
        post_id: Some("p1".to_string()),
        comment_id: None,
        video_id: None,
        created_at: Utc::now(),
    }
}

fn video_uploaded(video_id: &str) -> DomainEvent {
    DomainEvent::VideoUploaded {
        video_id: video_id.to_string(),
        author_id: "u1".to_string(),
        file_name: "clip.mp4".to_string(),
        file_size: 1_024,
        uploaded_at: Utc::now(),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn post_created_lands_in_feed_fan_out_and_reaches_its_handler() -> Result<()> {
    init_tracing();

    let metrics = Arc::new(LifecycleMetrics::new());
    let bus = EventBus::with_metrics(BusConfig::default(), metrics.clone())?;

    let received: Arc<Mutex<Vec<DomainEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    bus.subscribe_fn("post.created", move |event| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });
    bus.start();

    let handle = bus.publish(&post_created("p1", "A")).await?;
    assert_eq!(handle.queue, "feedFanOut");
    assert_eq!(handle.priority, 9);

    let metrics_ref = Arc::clone(&metrics);
    wait_until(move || metrics_ref.counter("post.created", EventStage::Processed) == 1).await;

    {
        let events = received.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "post.created");
        match &events[0] {
            DomainEvent::PostCreated { author_id, .. } => assert_eq!(author_id, "A"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    let stats = bus.queue_stats(Some("feedFanOut"))?;
    assert_eq!(stats["feedFanOut"].completed, 1);
    assert_eq!(stats["feedFanOut"].failed, 0);
    assert_eq!(metrics.counter("post.created", EventStage::Published), 1);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn every_registered_handler_runs_per_job() -> Result<()> {
    let metrics = Arc::new(LifecycleMetrics::new());
    let bus = EventBus::with_metrics(BusConfig::default(), metrics.clone())?;

    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    for counter in [&first, &second] {
        let counter = Arc::clone(counter);
        bus.subscribe_fn("like.added", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }
    bus.start();

    bus.publish(&like_added("l1")).await?;

    let metrics_ref = Arc::clone(&metrics);
    wait_until(move || metrics_ref.counter("like.added", EventStage::Processed) == 1).await;
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_handler_backs_off_then_dead_letters() -> Result<()> {
    init_tracing();

    let mut config = BusConfig::default();
    // share.created has no explicit mapping; it runs on the default queue
    config.queues.get_mut("default").unwrap().max_attempts = 3;

    let metrics = Arc::new(LifecycleMetrics::new());
    let bus = EventBus::with_metrics(config, metrics.clone())?;

    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let attempt_log = Arc::clone(&attempts);
    bus.subscribe_fn("share.created", move |_| {
        let attempt_log = Arc::clone(&attempt_log);
        async move {
            attempt_log.lock().unwrap().push(Instant::now());
            anyhow::bail!("downstream rejected the share")
        }
    });
    bus.start();

    let handle = bus.publish(&share_created("s1")).await?;
    assert_eq!(handle.queue, "default");

    let metrics_ref = Arc::clone(&metrics);
    wait_until(move || metrics_ref.counter("share.created", EventStage::DeadLettered) == 1).await;

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3, "maxAttempts bounds the attempt count");
    let first_retry = attempts[1] - attempts[0];
    let second_retry = attempts[2] - attempts[1];
    assert!(first_retry >= Duration::from_secs(1) && first_retry < Duration::from_millis(1_500));
    assert!(second_retry >= Duration::from_secs(2) && second_retry < Duration::from_millis(2_500));

    // Terminal failure is counted exactly once, on the queue and the DLQ
    let stats = bus.queue_stats(None)?;
    assert_eq!(stats["default"].failed, 1);
    assert_eq!(stats["default"].delayed, 0);
    assert_eq!(stats["dlq"].waiting, 1);
    assert_eq!(metrics.counter("share.created", EventStage::Failed), 3);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn publish_batch_reports_partial_failure_without_raising() -> Result<()> {
    let mut config = BusConfig::default();
    // Misroute one event type to a queue that has no descriptor
    config
        .event_queues
        .insert("video.uploaded".to_string(), "missingQueue".to_string());
    let bus = EventBus::new(config)?;

    let single = bus.publish(&video_uploaded("v0")).await;
    assert!(matches!(single, Err(PulseError::QueueNotConfigured(name)) if name == "missingQueue"));

    let events = vec![
        post_created("p1", "A"),
        like_added("l1"),
        video_uploaded("v1"),
    ];
    let outcome = bus.publish_batch(&events).await;
    assert_eq!(outcome.successful, 2);
    assert_eq!(outcome.failed, 1);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dead_letter_replay_resets_attempts_and_is_single_use() -> Result<()> {
    let mut config = BusConfig::default();
    config.queues.get_mut("default").unwrap().max_attempts = 1;

    let metrics = Arc::new(LifecycleMetrics::new());
    let bus = EventBus::with_metrics(config, metrics.clone())?;

    let poisoned = Arc::new(AtomicBool::new(true));
    let gate = Arc::clone(&poisoned);
    bus.subscribe_fn("share.created", move |_| {
        let gate = Arc::clone(&gate);
        async move {
            if gate.load(Ordering::SeqCst) {
                anyhow::bail!("transient outage")
            }
            Ok(())
        }
    });
    bus.start();

    let handle = bus.publish(&share_created("s1")).await?;

    let metrics_ref = Arc::clone(&metrics);
    wait_until(move || metrics_ref.counter("share.created", EventStage::DeadLettered) == 1).await;

    let details = bus.job_details("dlq", handle.job_id)?;
    assert_eq!(details.state, JobState::DeadLetter);
    assert!(details.last_error.is_some());

    // Replay with the fault cleared
    poisoned.store(false, Ordering::SeqCst);
    let replayed = bus.retry_from_dlq(handle.job_id).await?;
    assert_eq!(replayed.queue, "default");

    let metrics_ref = Arc::clone(&metrics);
    wait_until(move || metrics_ref.counter("share.created", EventStage::Processed) == 1).await;
    assert_eq!(bus.queue_stats(Some("dlq"))?["dlq"].waiting, 0);

    // The record is gone; a second replay misses
    let second = bus.retry_from_dlq(handle.job_id).await;
    assert!(matches!(second, Err(PulseError::NotFound(_))));

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn caller_supplied_job_id_deduplicates_publishes() -> Result<()> {
    let bus = EventBus::new(BusConfig::default())?;
    // Workers are not started; jobs accumulate in the queue

    let job_id = JobId::new();
    let options = PublishOptions {
        job_id: Some(job_id),
        ..Default::default()
    };
    bus.publish_with(&post_created("p1", "A"), options).await?;
    bus.publish_with(&post_created("p1", "A"), options).await?;

    let stats = bus.queue_stats(Some("feedFanOut"))?;
    assert_eq!(stats["feedFanOut"].waiting, 1);

    let details = bus.job_details("feedFanOut", job_id)?;
    assert_eq!(details.state, JobState::Waiting);
    assert_eq!(details.priority, 9);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stalled_worker_lease_is_reclaimed_by_the_housekeeper() -> Result<()> {
    let mut config = BusConfig::default();
    let descriptor = config.queues.get_mut("default").unwrap();
    descriptor.max_attempts = 1;
    // The handler deadline stays far away so only the lease can expire
    descriptor.timeout = Duration::from_secs(600);
    config.lease.lock_duration_ms = 200;
    config.lease.lock_renew_ms = 60_000;
    config.lease.housekeeper_interval_ms = 50;

    let bus = EventBus::new(config)?;
    bus.subscribe_fn("share.created", |_| async {
        // Simulates a stalled worker that never renews its lease
        tokio::time::sleep(Duration::from_secs(120)).await;
        Ok(())
    });
    bus.start();

    bus.publish(&share_created("s1")).await?;

    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let stats = bus.queue_stats(Some("dlq")).unwrap();
            if stats["dlq"].waiting == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stalled job should reach the DLQ");

    let stats = bus.queue_stats(Some("default"))?;
    assert_eq!(stats["default"].failed, 1);

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn events_without_handlers_complete_successfully() -> Result<()> {
    let metrics = Arc::new(LifecycleMetrics::new());
    let bus = EventBus::with_metrics(BusConfig::default(), metrics.clone())?;
    bus.start();

    bus.publish(&like_added("l1")).await?;

    let metrics_ref = Arc::clone(&metrics);
    wait_until(move || metrics_ref.counter("like.added", EventStage::Processed) == 1).await;

    bus.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn publish_after_shutdown_is_rejected() -> Result<()> {
    let bus = EventBus::new(BusConfig::default())?;
    bus.start();
    bus.shutdown().await;

    let result = bus.publish(&post_created("p1", "A")).await;
    assert!(matches!(result, Err(PulseError::ShuttingDown)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn handler_timeout_follows_the_retry_path() -> Result<()> {
    let mut config = BusConfig::default();
    let descriptor = config.queues.get_mut("default").unwrap();
    descriptor.max_attempts = 1;
    descriptor.timeout = Duration::from_millis(100);

    let metrics = Arc::new(LifecycleMetrics::new());
    let bus = EventBus::with_metrics(config, metrics.clone())?;
    bus.subscribe_fn("share.created", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    });
    bus.start();

    let handle = bus.publish(&share_created("s1")).await?;

    let metrics_ref = Arc::clone(&metrics);
    wait_until(move || metrics_ref.counter("share.created", EventStage::DeadLettered) == 1).await;

    let details = bus.job_details("dlq", handle.job_id)?;
    assert!(
        details
            .last_error
            .as_deref()
            .is_some_and(|err| err.contains("timed out"))
    );

    bus.shutdown().await;
    Ok(())
}
