use super::message::*;
use crate::constants::{DEFAULT_HEARTBEAT_INTERVAL, MIN_HEARTBEAT_INTERVAL};
use flume::Sender;
use std::time::Duration;
use tokio::{
    select,
    sync::watch,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

/// Converts a Hello's heartbeat interval (in milliseconds) into a [`Duration`].
///
/// Intervals below [`MIN_HEARTBEAT_INTERVAL`] are raised to it, and
/// unrepresentable ones fall back to [`DEFAULT_HEARTBEAT_INTERVAL`].
pub(crate) fn interval_from_millis(millis: f64) -> Duration {
    match Duration::try_from_secs_f64(millis / 1000.0) {
        Ok(interval) => {
            if interval < MIN_HEARTBEAT_INTERVAL {
                warn!("Raising heartbeat interval of {millis}ms to {MIN_HEARTBEAT_INTERVAL:?}.");
            }
            interval.max(MIN_HEARTBEAT_INTERVAL)
        },
        Err(_) => {
            warn!("Unusable heartbeat interval {millis}, using {DEFAULT_HEARTBEAT_INTERVAL:?}.");
            DEFAULT_HEARTBEAT_INTERVAL
        },
    }
}

/// Asks the signalling task for a heartbeat once per interval.
///
/// A changed interval (after a resume) restarts the wait.
#[instrument(skip(interval, ws, cancel))]
pub(crate) async fn runner(
    mut interval: watch::Receiver<Duration>,
    ws: Sender<WsMessage>,
    cancel: CancellationToken,
) {
    trace!("Heartbeat handle started.");

    let mut next_heartbeat = Instant::now() + *interval.borrow_and_update();

    loop {
        select! {
            () = cancel.cancelled() => break,
            () = sleep_until(next_heartbeat) => {
                if ws.send(WsMessage::Heartbeat).is_err() {
                    break;
                }
                next_heartbeat += *interval.borrow();
            },
            changed = interval.changed() => {
                if changed.is_err() {
                    break;
                }
                next_heartbeat = Instant::now() + *interval.borrow_and_update();
            },
        }
    }

    trace!("Heartbeat handle stopped.");
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_current_interval() {
        let (interval_tx, interval_rx) = watch::channel(Duration::from_millis(100));
        let (ws_tx, ws_rx) = flume::unbounded();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(runner(interval_rx, ws_tx, cancel.clone()));

        sleep(Duration::from_millis(350)).await;
        assert_eq!(ws_rx.drain().count(), 3);

        interval_tx.send_replace(Duration::from_millis(1000));
        sleep(Duration::from_millis(900)).await;
        assert_eq!(ws_rx.drain().count(), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(ws_rx.drain().count(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn hello_intervals_are_milliseconds() {
        assert_eq!(interval_from_millis(41_250.0), Duration::from_millis(41_250));
        assert_eq!(interval_from_millis(-1.0), DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(interval_from_millis(f64::NAN), DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(interval_from_millis(f64::INFINITY), DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn tiny_intervals_are_raised() {
        assert_eq!(interval_from_millis(0.0), MIN_HEARTBEAT_INTERVAL);
        assert_eq!(interval_from_millis(0.5), MIN_HEARTBEAT_INTERVAL);
        assert_eq!(interval_from_millis(250.0), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_from_server_does_not_spin() {
        let (_interval_tx, interval_rx) = watch::channel(interval_from_millis(0.0));
        let (ws_tx, ws_rx) = flume::unbounded();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(runner(interval_rx, ws_tx, cancel.clone()));

        sleep(Duration::from_millis(1100)).await;
        assert_eq!(ws_rx.drain().count(), 4);

        cancel.cancel();
        task.await.unwrap();
    }
}
