// ── Channel poller ──
//
// One task per enabled channel, each on its own timer. A query still in
// flight at a tick keeps running until it has used up the request timeout;
// ticks inside that budget are skipped. Past it, the query is dropped and
// published as a timeout, and the next poll starts right away instead of
// queueing behind it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::AggregatorHandle;
use crate::config::PollingConfig;
use crate::model::{ChannelReading, FaultKind, ReadingFault};
use crate::source::CountSource;

enum Outcome {
    Done(ChannelReading),
    Abandoned,
    Cancelled,
}

/// Poll `source` every `polling.interval` until `cancel` fires, publishing
/// every outcome to the aggregator.
pub async fn run_poller<S: CountSource>(
    source: Arc<S>,
    polling: PollingConfig,
    aggregator: AggregatorHandle,
    cancel: CancellationToken,
) {
    let id = source.id().clone();
    let PollingConfig {
        interval,
        request_timeout,
        ..
    } = polling;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle: u64 = 0;

    info!(channel = %id, ?interval, ?request_timeout, "poller started");
    'schedule: loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Runs more than once only when a poll is abandoned: the tick
        // that abandoned it also starts the next one.
        loop {
            cycle += 1;
            let outcome = poll(source.as_ref(), cycle, request_timeout, &mut ticker, &cancel).await;
            let (reading, abandoned) = match outcome {
                Outcome::Cancelled => break 'schedule,
                Outcome::Done(reading) => (reading, false),
                Outcome::Abandoned => {
                    warn!(channel = %id, cycle, "poll outstanding past the request timeout, abandoned");
                    let fault = ReadingFault {
                        kind: FaultKind::Timeout,
                        message: format!(
                            "no answer within the {}ms request timeout",
                            request_timeout.as_millis()
                        ),
                    };
                    (ChannelReading::error(id.clone(), fault, cycle), true)
                }
            };

            if aggregator.on_channel_update(reading).await.is_err() {
                debug!(channel = %id, "aggregator gone, poller exiting");
                break 'schedule;
            }
            if !abandoned {
                break;
            }
        }
    }
    info!(channel = %id, cycles = cycle, "poller stopped");
}

async fn poll<S: CountSource>(
    source: &S,
    cycle: u64,
    budget: Duration,
    ticker: &mut Interval,
    cancel: &CancellationToken,
) -> Outcome {
    let started = Instant::now();
    let query = source.query(cycle);
    tokio::pin!(query);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Cancelled,
            reading = &mut query => return Outcome::Done(reading),
            _ = ticker.tick() => {
                if started.elapsed() >= budget {
                    return Outcome::Abandoned;
                }
                debug!(cycle, "poll still within the request timeout, tick skipped");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::OverridePolicy;
    use crate::model::{ChannelId, ReadingStatus};

    /// Answers after `delay(cycle)` with a fixed count.
    struct Scripted {
        id: ChannelId,
        count: u32,
        delay: fn(u64) -> Duration,
    }

    impl CountSource for Scripted {
        fn id(&self) -> &ChannelId {
            &self.id
        }

        async fn query(&self, cycle: u64) -> ChannelReading {
            tokio::time::sleep((self.delay)(cycle)).await;
            ChannelReading::ok(self.id.clone(), self.count, cycle)
        }
    }

    /// One-second ticks with a budget shorter than the interval.
    fn tight() -> PollingConfig {
        PollingConfig {
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_millis(500),
            ..PollingConfig::default()
        }
    }

    fn spawn_aggregator(polling: &PollingConfig, cancel: &CancellationToken) -> AggregatorHandle {
        AggregatorHandle::spawn(OverridePolicy::UntilCleared, polling, None, cancel.clone()).0
    }

    fn spawn_source(
        source: Scripted,
        polling: &PollingConfig,
        aggregator: &AggregatorHandle,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(run_poller(
            Arc::new(source),
            polling.clone(),
            aggregator.clone(),
            cancel.clone(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_poll_is_published_and_next_poll_starts_immediately() {
        let cancel = CancellationToken::new();
        let polling = tight();
        let aggregator = spawn_aggregator(&polling, &cancel);
        let mut rx = aggregator.subscribe();
        spawn_source(
            Scripted {
                id: ChannelId::from("a"),
                count: 4,
                delay: |cycle| {
                    if cycle == 1 {
                        Duration::from_secs(30)
                    } else {
                        Duration::from_millis(100)
                    }
                },
            },
            &polling,
            &aggregator,
            &cancel,
        );

        rx.changed().await.unwrap();
        let first = rx.borrow_and_update().clone();
        let reading = first.reading(&ChannelId::from("a")).unwrap();
        assert_eq!(reading.cycle, 1);
        assert_eq!(reading.status, ReadingStatus::Error);
        assert_eq!(reading.fault.as_ref().unwrap().kind, FaultKind::Timeout);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let snap = aggregator.current_snapshot();
        let reading = snap.reading(&ChannelId::from("a")).unwrap();
        assert_eq!(reading.cycle, 2);
        assert_eq!(reading.status, ReadingStatus::Ok);
        assert_eq!(snap.effective_total, 4);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_channel_does_not_delay_healthy_one() {
        let cancel = CancellationToken::new();
        let polling = tight();
        let aggregator = spawn_aggregator(&polling, &cancel);
        spawn_source(
            Scripted {
                id: ChannelId::from("hung"),
                count: 9,
                delay: |_| Duration::from_secs(3600),
            },
            &polling,
            &aggregator,
            &cancel,
        );
        spawn_source(
            Scripted {
                id: ChannelId::from("fast"),
                count: 2,
                delay: |_| Duration::from_millis(50),
            },
            &polling,
            &aggregator,
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let snap = aggregator.current_snapshot();

        let fast = snap.reading(&ChannelId::from("fast")).unwrap();
        assert_eq!(fast.cycle, 3);
        assert_eq!(fast.status, ReadingStatus::Ok);

        let hung = snap.reading(&ChannelId::from("hung")).unwrap();
        assert_eq!(hung.cycle, 2);
        assert_eq!(hung.status, ReadingStatus::Error);
        assert_eq!(snap.effective_total, 2);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_in_flight_poll() {
        let cancel = CancellationToken::new();
        let polling = tight();
        let aggregator = spawn_aggregator(&polling, &cancel);
        let task = spawn_source(
            Scripted {
                id: ChannelId::from("a"),
                count: 1,
                delay: |_| Duration::from_secs(3600),
            },
            &polling,
            &aggregator,
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(aggregator.current_snapshot().channels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_answer_within_default_timeout_counts() {
        let cancel = CancellationToken::new();
        let polling = PollingConfig::default();
        assert!(polling.request_timeout > polling.interval);
        let aggregator = spawn_aggregator(&polling, &cancel);
        spawn_source(
            Scripted {
                id: ChannelId::from("slow"),
                count: 6,
                delay: |_| Duration::from_millis(2500),
            },
            &polling,
            &aggregator,
            &cancel,
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        let snap = aggregator.current_snapshot();
        let reading = snap.reading(&ChannelId::from("slow")).unwrap();
        assert_eq!(reading.cycle, 1);
        assert_eq!(reading.status, ReadingStatus::Ok);
        assert_eq!(snap.effective_total, 6);

        tokio::time::sleep(Duration::from_secs(7)).await;
        let snap = aggregator.current_snapshot();
        let reading = snap.reading(&ChannelId::from("slow")).unwrap();
        assert!(reading.cycle >= 2);
        assert_eq!(reading.status, ReadingStatus::Ok);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_poll_is_abandoned_only_after_default_timeout() {
        let cancel = CancellationToken::new();
        let polling = PollingConfig::default();
        let aggregator = spawn_aggregator(&polling, &cancel);
        spawn_source(
            Scripted {
                id: ChannelId::from("hung"),
                count: 1,
                delay: |_| Duration::from_secs(3600),
            },
            &polling,
            &aggregator,
            &cancel,
        );

        // the tick at 2s is inside the 3s budget
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(aggregator.current_snapshot().channels.is_empty());

        // the tick at 4s is past it
        tokio::time::sleep(Duration::from_secs(1)).await;
        let snap = aggregator.current_snapshot();
        let reading = snap.reading(&ChannelId::from("hung")).unwrap();
        assert_eq!(reading.cycle, 1);
        assert_eq!(reading.fault.as_ref().unwrap().kind, FaultKind::Timeout);
        assert!(reading.fault.as_ref().unwrap().message.contains("3000ms request timeout"));
        cancel.cancel();
    }
}
