//! Periodic telemetry polling
//!
//! Runs the configured queries on a fixed interval and forwards every
//! decoded snapshot to a broadcast channel. Exchanges are blocking, so each
//! query runs on the blocking pool; the poller awaits one before starting
//! the next and never has two requests outstanding.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PollConfig;
use crate::telemetry::{TelemetryKind, TelemetrySnapshot};
use crate::Controller;

/// Capacity of the update channel; slow receivers lag beyond this
const CHANNEL_CAPACITY: usize = 256;

/// One successful query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryUpdate {
    /// Query that produced the snapshot
    pub kind: TelemetryKind,
    /// Decoded reply
    pub snapshot: TelemetrySnapshot,
    /// Link state right after the exchange
    pub link_present: bool,
    /// When the reply was decoded
    pub received_at: DateTime<Utc>,
}

/// What subscribers receive
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PollEvent {
    /// A query succeeded
    Telemetry(TelemetryUpdate),
    /// The controller started or stopped answering
    LinkChanged {
        /// New link state
        present: bool,
        /// When the change was observed
        at: DateTime<Utc>,
    },
}

/// Drives the configured queries against one controller
pub struct TelemetryPoller {
    controller: Arc<Controller>,
    config: PollConfig,
    events: broadcast::Sender<PollEvent>,
}

impl TelemetryPoller {
    /// Create a poller; nothing is sent until [`run`](Self::run)
    pub fn new(controller: Arc<Controller>, config: PollConfig) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            controller,
            config,
            events,
        }
    }

    /// Receive every event sent after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    /// Poll until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut link_present = self.controller.link_present();

        info!(
            "polling {} queries every {:?}",
            self.config.kinds.len(),
            self.config.interval()
        );

        'outer: loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for &kind in &self.config.kinds {
                if cancel.is_cancelled() {
                    break 'outer;
                }

                let controller = Arc::clone(&self.controller);
                let result = match tokio::task::spawn_blocking(move || controller.query(kind)).await
                {
                    Ok(result) => result,
                    Err(e) => {
                        error!("{} query task failed: {}", kind, e);
                        continue;
                    }
                };

                let present = self.controller.link_present();
                if present != link_present {
                    link_present = present;
                    if present {
                        info!("controller answering");
                    } else {
                        warn!("controller not answering");
                    }
                    let _ = self.events.send(PollEvent::LinkChanged {
                        present,
                        at: Utc::now(),
                    });
                }

                match result {
                    Ok(snapshot) => {
                        let _ = self.events.send(PollEvent::Telemetry(TelemetryUpdate {
                            kind,
                            snapshot,
                            link_present: present,
                            received_at: Utc::now(),
                        }));
                    }
                    Err(e) => debug!("{} poll failed: {}", kind, e),
                }
            }
        }

        info!("poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::protocol::mock::{MockReply, MockTransport};
    use std::time::Duration;

    fn controller(mock: &MockTransport) -> Arc<Controller> {
        let config = ControllerConfig {
            max_retries: 0,
            timeout_ms: 5,
            ..Default::default()
        };
        Arc::new(Controller::with_transport(config, mock.boxed()))
    }

    async fn next(rx: &mut broadcast::Receiver<PollEvent>) -> PollEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let mock = MockTransport::with_responder(|line| match line {
            "?V" => vec![MockReply::line("+V=240:241:50")],
            "?FF" => vec![MockReply::line("+FF=0")],
            _ => vec![MockReply::line("-")],
        });
        let controller = controller(&mock);
        let poller = TelemetryPoller::new(
            Arc::clone(&controller),
            PollConfig {
                interval_ms: 10,
                kinds: vec![TelemetryKind::Volts, TelemetryKind::Fault],
            },
        );
        let mut rx = poller.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        assert!(matches!(
            next(&mut rx).await,
            PollEvent::LinkChanged { present: true, .. }
        ));
        match next(&mut rx).await {
            PollEvent::Telemetry(update) => {
                assert_eq!(update.kind, TelemetryKind::Volts);
                assert!(update.link_present);
                assert_eq!(
                    update.snapshot,
                    TelemetrySnapshot::Voltages {
                        battery: Some(24.0),
                        drive: Some(24.1),
                        analog: Some(5.0),
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        match next(&mut rx).await {
            PollEvent::Telemetry(update) => assert_eq!(update.kind, TelemetryKind::Fault),
            other => panic!("unexpected {:?}", other),
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(controller.latest(TelemetryKind::Volts).is_some());
    }

    #[tokio::test]
    async fn test_link_loss_is_reported() {
        let mock = MockTransport::new();
        let controller = controller(&mock);

        mock.push_line("+V=1:2:3");
        controller.get_volts().unwrap();
        assert!(controller.link_present());

        // Nothing queued from here on, every query times out
        let poller = TelemetryPoller::new(
            Arc::clone(&controller),
            PollConfig {
                interval_ms: 10,
                kinds: vec![TelemetryKind::Volts],
            },
        );
        let mut rx = poller.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        assert!(matches!(
            next(&mut rx).await,
            PollEvent::LinkChanged { present: false, .. }
        ));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_event_json() {
        let event = PollEvent::LinkChanged {
            present: false,
            at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "link_changed");
        assert_eq!(json["present"], false);
    }
}
