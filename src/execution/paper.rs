//! Paper trading exchange
//!
//! In-memory simulation of the order surface: market orders fill at the
//! expected (or mark) price plus slippage, stop orders rest until the mark
//! price crosses them. Fault injection hooks let tests drive rejection,
//! timeout and failure paths.

use super::{
    Exchange, ExchangeError, Fill, OrderId, OrderRequest, OrderResult, OrderSide, OrderStatus,
    OrderType, PositionSnapshot,
};
use crate::risk::AccountState;
use crate::signal::Direction;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct RestingStop {
    id: OrderId,
    side: OrderSide,
    size: Decimal,
    stop_price: Decimal,
}

#[derive(Debug, Default)]
struct Faults {
    reject_orders: u32,
    unconfirmed_orders: u32,
    fail_modifies: u32,
    fail_position_reads: u32,
    delay: Option<Duration>,
}

#[derive(Debug)]
struct PaperState {
    balance: Decimal,
    mark_price: Option<Decimal>,
    position: Option<PositionSnapshot>,
    stops: Vec<RestingStop>,
    fills: Vec<Fill>,
    next_id: u64,
    faults: Faults,
}

/// Paper trading exchange with simulated fills
#[derive(Debug, Clone)]
pub struct PaperExchange {
    slippage: Decimal,
    state: Arc<RwLock<PaperState>>,
}

impl PaperExchange {
    /// Create a paper exchange holding `balance`
    pub fn new(balance: Decimal, slippage: Decimal) -> Self {
        Self {
            slippage,
            state: Arc::new(RwLock::new(PaperState {
                balance,
                mark_price: None,
                position: None,
                stops: Vec::new(),
                fills: Vec::new(),
                next_id: 1,
                faults: Faults::default(),
            })),
        }
    }

    /// Update the mark price, filling any stop it crosses.
    ///
    /// Returns the fills produced.
    pub async fn set_mark_price(&self, price: Decimal) -> Vec<Fill> {
        let mut state = self.state.write().await;
        state.mark_price = Some(price);

        let (triggered, resting): (Vec<RestingStop>, Vec<RestingStop>) =
            state.stops.drain(..).partition(|stop| match stop.side {
                OrderSide::Sell => price <= stop.stop_price,
                OrderSide::Buy => price >= stop.stop_price,
            });
        state.stops = resting;

        let mut fills = Vec::new();
        for stop in triggered {
            if let Some(fill) = Self::apply_fill(&mut state, stop.id, stop.side, stop.size, price, true) {
                tracing::info!(order_id = %fill.order_id, price = %price, "Paper stop triggered");
                fills.push(fill);
            }
        }
        fills
    }

    /// Replace the simulated exchange position
    pub async fn set_position(&self, position: Option<PositionSnapshot>) {
        let mut state = self.state.write().await;
        state.position = position;
        if position.is_none() {
            state.stops.clear();
        }
    }

    /// All fills so far
    pub async fn fills(&self) -> Vec<Fill> {
        self.state.read().await.fills.clone()
    }

    /// Trigger price of the resting stop, if any
    pub async fn resting_stop(&self) -> Option<(OrderId, Decimal)> {
        let state = self.state.read().await;
        state.stops.first().map(|s| (s.id.clone(), s.stop_price))
    }

    /// Reject the next `n` orders
    pub async fn reject_next_orders(&self, n: u32) {
        self.state.write().await.faults.reject_orders = n;
    }

    /// Fill the next `n` market orders but report them as merely accepted
    pub async fn leave_next_orders_unconfirmed(&self, n: u32) {
        self.state.write().await.faults.unconfirmed_orders = n;
    }

    /// Fail the next `n` stop modifications
    pub async fn fail_next_modifies(&self, n: u32) {
        self.state.write().await.faults.fail_modifies = n;
    }

    /// Fail the next `n` position reads
    pub async fn fail_next_position_reads(&self, n: u32) {
        self.state.write().await.faults.fail_position_reads = n;
    }

    /// Delay every call by `delay`
    pub async fn set_latency(&self, delay: Option<Duration>) {
        self.state.write().await.faults.delay = delay;
    }

    async fn latency(&self) {
        let delay = self.state.read().await.faults.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_id(state: &mut PaperState) -> OrderId {
        let id = format!("paper-{}", state.next_id);
        state.next_id += 1;
        id
    }

    fn fill_price(&self, side: OrderSide, reference: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => reference * (Decimal::ONE + self.slippage),
            OrderSide::Sell => reference * (Decimal::ONE - self.slippage),
        }
    }

    /// Apply a fill to the position and balance
    fn apply_fill(
        state: &mut PaperState,
        order_id: OrderId,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
        reduce_only: bool,
    ) -> Option<Fill> {
        let direction = match side {
            OrderSide::Buy => Direction::Long,
            OrderSide::Sell => Direction::Short,
        };

        let filled = match state.position {
            Some(pos) if pos.direction != direction => {
                let closed = size.min(pos.size);
                let pnl = (price - pos.entry_price) * closed * pos.direction.sign();
                state.balance += pnl;
                let remaining = pos.size - closed;
                state.position = (remaining > Decimal::ZERO).then_some(PositionSnapshot {
                    size: remaining,
                    ..pos
                });
                if state.position.is_none() {
                    state.stops.clear();
                }
                closed
            }
            Some(pos) if !reduce_only => {
                let total = pos.size + size;
                let entry = (pos.entry_price * pos.size + price * size) / total;
                state.position = Some(PositionSnapshot {
                    direction,
                    size: total,
                    entry_price: entry,
                });
                size
            }
            None if !reduce_only => {
                state.position = Some(PositionSnapshot {
                    direction,
                    size,
                    entry_price: price,
                });
                size
            }
            _ => Decimal::ZERO,
        };

        if filled.is_zero() {
            return None;
        }
        let fill = Fill {
            order_id,
            side,
            price,
            size: filled,
            reduce_only,
            timestamp: Utc::now(),
        };
        state.fills.push(fill.clone());
        Some(fill)
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderResult, ExchangeError> {
        self.latency().await;
        let mut state = self.state.write().await;
        let order_id = Self::next_id(&mut state);

        if state.faults.reject_orders > 0 {
            state.faults.reject_orders -= 1;
            tracing::info!(%order_id, "Paper order rejected");
            return Ok(OrderResult {
                id: order_id,
                status: OrderStatus::Rejected,
                fill_price: None,
                filled_size: Decimal::ZERO,
                reason: Some("simulated rejection".to_string()),
            });
        }

        if order.order_type == OrderType::StopMarket {
            let stop_price = order
                .stop_price
                .ok_or_else(|| ExchangeError::Rejected("stop order without stop price".into()))?;
            state.stops.push(RestingStop {
                id: order_id.clone(),
                side: order.side,
                size: order.size,
                stop_price,
            });
            tracing::info!(%order_id, %stop_price, "Paper stop placed");
            return Ok(OrderResult {
                id: order_id,
                status: OrderStatus::Accepted,
                fill_price: None,
                filled_size: Decimal::ZERO,
                reason: None,
            });
        }

        let reference = order
            .expected_price
            .or(state.mark_price)
            .ok_or_else(|| ExchangeError::Rejected("no price to fill against".into()))?;
        let price = self.fill_price(order.side, reference);

        let Some(fill) = Self::apply_fill(
            &mut state,
            order_id.clone(),
            order.side,
            order.size,
            price,
            order.reduce_only,
        ) else {
            return Ok(OrderResult {
                id: order_id,
                status: OrderStatus::Rejected,
                fill_price: None,
                filled_size: Decimal::ZERO,
                reason: Some("reduce-only order with no position".to_string()),
            });
        };

        if state.faults.unconfirmed_orders > 0 {
            state.faults.unconfirmed_orders -= 1;
            return Ok(OrderResult {
                id: order_id,
                status: OrderStatus::Accepted,
                fill_price: None,
                filled_size: Decimal::ZERO,
                reason: None,
            });
        }

        tracing::info!(%order_id, price = %fill.price, size = %fill.size, "Paper order filled");
        let status = if fill.size < order.size {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };
        Ok(OrderResult {
            id: order_id,
            status,
            fill_price: Some(fill.price),
            filled_size: fill.size,
            reason: None,
        })
    }

    async fn modify_stop(&self, order_id: &str, stop_price: Decimal) -> Result<(), ExchangeError> {
        self.latency().await;
        let mut state = self.state.write().await;
        if state.faults.fail_modifies > 0 {
            state.faults.fail_modifies -= 1;
            return Err(ExchangeError::Network("simulated modify failure".into()));
        }
        let stop = state
            .stops
            .iter_mut()
            .find(|s| s.id == order_id)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))?;
        stop.stop_price = stop_price;
        tracing::debug!(%order_id, %stop_price, "Paper stop modified");
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        self.latency().await;
        let mut state = self.state.write().await;
        let before = state.stops.len();
        state.stops.retain(|s| s.id != order_id);
        if state.stops.len() == before {
            return Err(ExchangeError::OrderNotFound(order_id.to_string()));
        }
        tracing::info!(%order_id, "Paper order cancelled");
        Ok(())
    }

    async fn get_position(&self, _symbol: &str) -> Result<Option<PositionSnapshot>, ExchangeError> {
        self.latency().await;
        let mut state = self.state.write().await;
        if state.faults.fail_position_reads > 0 {
            state.faults.fail_position_reads -= 1;
            return Err(ExchangeError::Network("simulated position read failure".into()));
        }
        Ok(state.position)
    }

    async fn get_balance(&self) -> Result<AccountState, ExchangeError> {
        self.latency().await;
        let state = self.state.read().await;
        let margin_used = state
            .position
            .map(|p| p.size * p.entry_price)
            .unwrap_or(Decimal::ZERO);
        Ok(AccountState::new(
            state.balance,
            (state.balance - margin_used).max(Decimal::ZERO),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_market_entry_fills_at_expected_price() {
        let exchange = PaperExchange::new(dec!(10000), dec!(0));
        let order = OrderRequest::market_entry("ETHUSD", Direction::Long, dec!(0.5), dec!(2000));

        let result = exchange.place_order(order).await.unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.fill_price, Some(dec!(2000)));

        let position = exchange.get_position("ETHUSD").await.unwrap().unwrap();
        assert_eq!(position.direction, Direction::Long);
        assert_eq!(position.size, dec!(0.5));

        let account = exchange.get_balance().await.unwrap();
        assert_eq!(account.available_margin, dec!(9000));
    }

    #[tokio::test]
    async fn test_slippage_against_taker() {
        let exchange = PaperExchange::new(dec!(10000), dec!(0.001));
        let order = OrderRequest::market_entry("ETHUSD", Direction::Short, dec!(1), dec!(2000));
        let result = exchange.place_order(order).await.unwrap();
        assert_eq!(result.fill_price, Some(dec!(1998)));
    }

    #[tokio::test]
    async fn test_exit_realizes_pnl() {
        let exchange = PaperExchange::new(dec!(1000), dec!(0));
        exchange
            .place_order(OrderRequest::market_entry("ETHUSD", Direction::Short, dec!(1), dec!(2000)))
            .await
            .unwrap();
        let exit = OrderRequest::market_exit("ETHUSD", Direction::Short, dec!(1), Some(dec!(1900)));
        let result = exchange.place_order(exit).await.unwrap();
        assert!(result.is_filled());

        assert!(exchange.get_position("ETHUSD").await.unwrap().is_none());
        assert_eq!(exchange.get_balance().await.unwrap().balance, dec!(1100));
    }

    #[tokio::test]
    async fn test_reduce_only_without_position_rejected() {
        let exchange = PaperExchange::new(dec!(1000), dec!(0));
        let exit = OrderRequest::market_exit("ETHUSD", Direction::Long, dec!(1), Some(dec!(2000)));
        let result = exchange.place_order(exit).await.unwrap();
        assert_eq!(result.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn test_stop_triggers_on_mark_price() {
        let exchange = PaperExchange::new(dec!(10000), dec!(0));
        exchange
            .place_order(OrderRequest::market_entry("ETHUSD", Direction::Long, dec!(1), dec!(2000)))
            .await
            .unwrap();
        let stop = exchange
            .place_order(OrderRequest::stop_loss("ETHUSD", Direction::Long, dec!(1), dec!(1960)))
            .await
            .unwrap();
        assert_eq!(stop.status, OrderStatus::Accepted);

        exchange.modify_stop(&stop.id, dec!(1980)).await.unwrap();
        assert!(exchange.set_mark_price(dec!(1990)).await.is_empty());

        let fills = exchange.set_mark_price(dec!(1979)).await;
        assert_eq!(fills.len(), 1);
        assert!(exchange.get_position("ETHUSD").await.unwrap().is_none());
        assert!(exchange.resting_stop().await.is_none());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let exchange = PaperExchange::new(dec!(10000), dec!(0));
        exchange.reject_next_orders(1).await;
        let order = OrderRequest::market_entry("ETHUSD", Direction::Long, dec!(1), dec!(2000));
        let result = exchange.place_order(order.clone()).await.unwrap();
        assert_eq!(result.status, OrderStatus::Rejected);

        exchange.fail_next_modifies(2).await;
        assert!(exchange.modify_stop("missing", dec!(1)).await.unwrap_err().is_transient());
        assert!(exchange.modify_stop("missing", dec!(1)).await.is_err());
        assert!(matches!(
            exchange.modify_stop("missing", dec!(1)).await,
            Err(ExchangeError::OrderNotFound(_))
        ));

        exchange.fail_next_position_reads(1).await;
        assert!(exchange.get_position("ETHUSD").await.is_err());
        assert!(exchange.get_position("ETHUSD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfirmed_order_still_opens_position() {
        let exchange = PaperExchange::new(dec!(10000), dec!(0));
        exchange.leave_next_orders_unconfirmed(1).await;
        let order = OrderRequest::market_entry("ETHUSD", Direction::Long, dec!(1), dec!(2000));
        let result = exchange.place_order(order).await.unwrap();
        assert_eq!(result.status, OrderStatus::Accepted);
        assert!(exchange.get_position("ETHUSD").await.unwrap().is_some());
    }
}
