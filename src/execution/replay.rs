use super::gateway::{SimulationGateway, Step};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Timer-driven replay of a shared gateway on a background task
///
/// The driver ticks at a fixed interval regardless of the tick timestamps
/// and stops on its own once every reader is exhausted.
pub struct Replay {
    handle: JoinHandle<usize>,
}

impl Replay {
    /// Start driving `gateway` every `speed`
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(gateway: Arc<Mutex<SimulationGateway>>, speed: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let emitted = drive(speed, move || match gateway.lock() {
                Ok(mut gateway) => Some(gateway.step()),
                Err(e) => {
                    tracing::error!("Gateway lock poisoned, stopping replay: {}", e);
                    None
                }
            })
            .await;

            tracing::info!("Replay driver finished after {} ticks", emitted);
            emitted
        });

        Self { handle }
    }

    /// Stop the driver; ticks already applied stay applied
    pub fn unsubscribe(&self) {
        self.handle.abort();
        tracing::info!("Replay driver unsubscribed");
    }

    /// Detached handle that stops the driver, usable after `finished` took `self`
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the driver to stop
    ///
    /// # Returns
    /// Ticks emitted, or None when the driver was unsubscribed
    pub async fn finished(self) -> Option<usize> {
        match self.handle.await {
            Ok(emitted) => Some(emitted),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                tracing::error!("Replay driver failed: {}", e);
                None
            }
        }
    }
}

/// Call `step` once per `speed` until it reports the end of input or yields `None`
///
/// # Returns
/// Number of `Step::Emitted` results
pub(crate) async fn drive<F>(speed: Duration, mut step: F) -> usize
where
    F: FnMut() -> Option<Step>,
{
    let mut ticker = tokio::time::interval(speed);
    let mut emitted = 0;

    loop {
        ticker.tick().await;
        match step() {
            Some(Step::Emitted { .. }) => emitted += 1,
            Some(Step::Pending) => {}
            Some(Step::Exhausted | Step::Disconnected) | None => break,
        }
    }

    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::MemorySource;
    use crate::models::{Account, Instrument};

    fn shared_gateway(ticks: usize) -> Arc<Mutex<SimulationGateway>> {
        let mut document = String::from("Time Bid BidSize Ask AskSize\n");
        for i in 0..ticks {
            document.push_str(&format!("{} 1.1 1 1.2 1\n", 1_700_000_000 + i));
        }

        let account = Account::new("Demo", 0.0).with_instrument(
            Instrument::new("EURUSD").with_time_frame(chrono::Duration::seconds(2)),
        );
        let source = MemorySource::new().with_document("EURUSD", document);

        let mut gateway = SimulationGateway::new(account, source);
        gateway.connect();
        Arc::new(Mutex::new(gateway))
    }

    #[tokio::test]
    async fn test_replay_runs_to_exhaustion() {
        let gateway = shared_gateway(4);

        let replay = Replay::subscribe(gateway.clone(), Duration::from_millis(1));
        assert_eq!(replay.finished().await, Some(4));

        let gateway = gateway.lock().unwrap();
        let instrument = gateway.account().instruments.get("EURUSD").unwrap();
        assert_eq!(instrument.points.len(), 4);
        assert_eq!(instrument.point_groups.len(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_driver() {
        let gateway = shared_gateway(1000);

        let replay = Replay::subscribe(gateway.clone(), Duration::from_secs(60));
        replay.unsubscribe();

        assert_eq!(replay.finished().await, None);
        let gateway = gateway.lock().unwrap();
        assert!(gateway.account().instruments.get("EURUSD").unwrap().points.len() <= 1);
    }

    #[tokio::test]
    async fn test_abort_handle_stops_driver() {
        let gateway = shared_gateway(1000);

        let replay = Replay::subscribe(gateway, Duration::from_secs(60));
        let stop = replay.abort_handle();
        stop.abort();

        assert_eq!(replay.finished().await, None);
    }

    #[tokio::test]
    async fn test_drive_counts_emitted_until_exhausted() {
        let mut script = vec![
            Step::Exhausted,
            Step::Emitted {
                instrument: "EURUSD".to_string(),
                time: chrono::Utc::now(),
            },
            Step::Pending,
            Step::Emitted {
                instrument: "EURUSD".to_string(),
                time: chrono::Utc::now(),
            },
        ];
        let mut calls = 0;

        let emitted = drive(Duration::from_millis(1), || {
            calls += 1;
            script.pop()
        })
        .await;

        assert_eq!(emitted, 2);
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_drive_stops_when_step_gives_up() {
        let emitted = drive(Duration::from_millis(1), || None).await;
        assert_eq!(emitted, 0);
    }

    #[tokio::test]
    async fn test_disconnected_gateway_finishes_immediately() {
        let gateway = shared_gateway(3);
        gateway.lock().unwrap().disconnect();

        let replay = Replay::subscribe(gateway, Duration::from_millis(1));
        assert_eq!(replay.finished().await, Some(0));
    }
}
