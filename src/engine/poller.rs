//! Periodic balance and position poll

use crate::execution::{with_timeout, Exchange, ExchangeError, PositionSnapshot};
use crate::risk::AccountState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// One poll of the exchange's authoritative state
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub position: Result<Option<PositionSnapshot>, ExchangeError>,
    pub account: Result<AccountState, ExchangeError>,
    /// When the reads started; anything that changed locally after this is
    /// not reflected in the report
    pub at: DateTime<Utc>,
}

/// Reads balance and position on a fixed period
#[derive(Clone)]
pub struct ReconciliationPoller {
    exchange: Arc<dyn Exchange>,
    symbol: String,
    interval: Duration,
    timeout: Duration,
}

impl ReconciliationPoller {
    pub fn new(exchange: Arc<dyn Exchange>, symbol: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            interval,
            timeout,
        }
    }

    /// Read position and balance once, each bounded by the call timeout
    pub async fn poll_once(&self) -> ReconcileReport {
        let at = Utc::now();
        let (position, account) = tokio::join!(
            with_timeout(self.timeout, self.exchange.get_position(&self.symbol)),
            with_timeout(self.timeout, self.exchange.get_balance()),
        );
        ReconcileReport {
            position,
            account,
            at,
        }
    }

    /// Poll until `shutdown` fires or the receiver is dropped.
    ///
    /// The first poll happens one interval after spawning.
    pub fn spawn(self, buffer: usize, mut shutdown: watch::Receiver<bool>) -> (mpsc::Receiver<ReconcileReport>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.poll_once().await;
                        if let Err(e) = &report.position {
                            tracing::warn!(error = %e, "Position poll failed");
                        }
                        if tx.send(report).await.is_err() {
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Reconciliation poller stopped");
        });
        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PaperExchange;
    use crate::signal::Direction;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_poll_once_reads_both() {
        let paper = PaperExchange::new(dec!(1000), dec!(0));
        paper
            .set_position(Some(PositionSnapshot {
                direction: Direction::Long,
                size: dec!(0.1),
                entry_price: dec!(2000),
            }))
            .await;
        let poller = ReconciliationPoller::new(Arc::new(paper), "ETHUSD", Duration::from_secs(30), Duration::from_secs(1));

        let report = poller.poll_once().await;
        assert_eq!(report.position.unwrap().unwrap().size, dec!(0.1));
        assert_eq!(report.account.unwrap().available_margin, dec!(800));
    }

    #[tokio::test]
    async fn test_report_stamped_before_reads() {
        let paper = PaperExchange::new(dec!(1000), dec!(0));
        paper.set_latency(Some(Duration::from_millis(50))).await;
        let poller = ReconciliationPoller::new(Arc::new(paper), "ETHUSD", Duration::from_secs(30), Duration::from_secs(1));

        let before = Utc::now();
        let report = poller.poll_once().await;
        let after = Utc::now();
        assert!(report.at >= before);
        assert!(after - report.at >= chrono::Duration::milliseconds(50));
        assert!(report.position.is_ok());
    }

    #[tokio::test]
    async fn test_poll_failure_is_reported_not_fatal() {
        let paper = PaperExchange::new(dec!(1000), dec!(0));
        paper.fail_next_position_reads(1).await;
        let poller = ReconciliationPoller::new(Arc::new(paper), "ETHUSD", Duration::from_millis(10), Duration::from_secs(1));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut rx, handle) = poller.spawn(4, shutdown_rx);
        let first = rx.recv().await.unwrap();
        assert!(first.position.is_err());
        let second = rx.recv().await.unwrap();
        assert!(second.position.unwrap().is_none());

        drop(rx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_poller_stops_on_shutdown() {
        let paper = PaperExchange::new(dec!(1000), dec!(0));
        let poller = ReconciliationPoller::new(Arc::new(paper), "ETHUSD", Duration::from_secs(3600), Duration::from_secs(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_rx, handle) = poller.spawn(4, shutdown_rx);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
