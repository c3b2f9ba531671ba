use crate::execution::SimulationGateway;
use crate::models::{Account, OrderStatus};
use serde::Serialize;

/// Bar and tick counts for one instrument
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentSummary {
    pub name: String,
    pub points: usize,
    pub bars: usize,
}

/// End-of-replay snapshot of an account
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub account: String,
    pub ticks: usize,
    pub instruments: Vec<InstrumentSummary>,
    pub filled_orders: usize,
    pub cancelled_orders: usize,
    pub active_orders: usize,
    pub closed_positions: usize,
    pub active_positions: usize,
    pub realized_gain_loss: f64,
    pub unrealized_gain_loss: f64,
    pub initial_balance: f64,
    pub balance: f64,
}

impl ReplayReport {
    /// Summarize `account` after `ticks` emitted ticks
    pub fn from_account(account: &Account, ticks: usize) -> Self {
        let count_status = |status: OrderStatus| {
            account
                .orders
                .iter()
                .filter(|order| order.status == Some(status))
                .count()
        };

        Self {
            account: account.name.clone(),
            ticks,
            instruments: account
                .instruments
                .iter()
                .map(|instrument| InstrumentSummary {
                    name: instrument.name.clone(),
                    points: instrument.points.len(),
                    bars: instrument.point_groups.len(),
                })
                .collect(),
            filled_orders: count_status(OrderStatus::Filled),
            cancelled_orders: count_status(OrderStatus::Cancelled),
            active_orders: account.active_orders.len(),
            closed_positions: account.positions.len(),
            active_positions: account.active_positions.len(),
            realized_gain_loss: account.realized_gain_loss(),
            unrealized_gain_loss: account.unrealized_gain_loss(),
            initial_balance: account.initial_balance,
            balance: account.balance,
        }
    }

    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║                     REPLAY REPORT                     ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("ACCOUNT {}", self.account);
        println!("  Ticks replayed:        {}", self.ticks);
        for instrument in &self.instruments {
            println!(
                "  {:<22} {} ticks, {} bars",
                format!("{}:", instrument.name),
                instrument.points,
                instrument.bars
            );
        }

        println!("\nORDERS");
        println!("  Filled:                {}", self.filled_orders);
        println!("  Cancelled:             {}", self.cancelled_orders);
        println!("  Still active:          {}", self.active_orders);

        println!("\nPOSITIONS");
        println!("  Closed:                {}", self.closed_positions);
        println!("  Active:                {}", self.active_positions);
        println!("  Realized P&L:          {:.2}", self.realized_gain_loss);
        println!("  Unrealized P&L:        {:.2}", self.unrealized_gain_loss);
        println!(
            "  Balance:               {:.2} (started at {:.2})",
            self.balance, self.initial_balance
        );
    }
}

/// Drains a gateway to exhaustion without the timer
#[derive(Debug, Default)]
pub struct ReplayRunner;

impl ReplayRunner {
    pub fn new() -> Self {
        Self
    }

    /// Connect if needed, replay every tick and summarize the account
    pub fn run(&self, gateway: &mut SimulationGateway) -> anyhow::Result<ReplayReport> {
        if !gateway.is_connected() {
            gateway.connect();
        }
        if !gateway.is_connected() {
            anyhow::bail!("Gateway for {} failed to connect", gateway.account().name);
        }

        tracing::info!(account = %gateway.account().name, "Starting replay");
        let ticks = gateway.replay_all();

        let report = ReplayReport::from_account(gateway.account(), ticks);
        tracing::info!(
            account = %report.account,
            "Replay complete: {} ticks, {} closed positions, P&L {:.2}",
            report.ticks,
            report.closed_positions,
            report.realized_gain_loss
        );

        Ok(report)
    }
}
