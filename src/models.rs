use crate::time_utils::TimeOfDay;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RobotStatus {
    Active,
    Paused,
    Archived,
}

impl RobotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RobotStatus::Active => "active",
            RobotStatus::Paused => "paused",
            RobotStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(RobotStatus::Active),
            "paused" => Ok(RobotStatus::Paused),
            "archived" => Ok(RobotStatus::Archived),
            other => Err(anyhow!("unknown robot status {}", other)),
        }
    }
}

/// A configured policy describing how to synthesize a day's worth of trading
/// activity for the accounts assigned to it. Owned by the configuration UI;
/// read-only here except for `last_run_at`.
#[derive(Debug, Clone)]
pub struct Robot {
    pub id: String,
    pub name: String,
    pub status: RobotStatus,
    pub execution_time: TimeOfDay,
    pub min_account_balance: f64,
    pub min_trades_per_day: u32,
    pub max_trades_per_day: u32,
    pub profit_range_min: f64,
    pub profit_range_max: f64,
    /// Target fraction of winning trades, 0-100.
    pub win_rate: f64,
    pub trade_window_start: TimeOfDay,
    pub trade_window_end: TimeOfDay,
    pub symbols: Vec<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// (robot, account) fan-out pair. The core only ever reads active rows.
#[derive(Debug, Clone)]
pub struct RobotAssignment {
    pub robot_id: String,
    pub account_id: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub real_balance: f64,
    pub demo_balance: f64,
    pub bonus_balance: f64,
    pub balance: f64,
}

impl Account {
    /// The derived sum the `balance` column must always equal.
    pub fn derived_balance(&self) -> f64 {
        self.real_balance + self.demo_balance + self.bonus_balance
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// A fabricated trade as produced by the materializer. Lives in memory only;
/// persistence immediately turns it into a closed [`Position`].
#[derive(Debug, Clone)]
pub struct GeneratedTrade {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub realized_pnl: f64,
    pub fees: f64,
    pub is_win: bool,
}

pub const POSITION_STATUS_CLOSED: &str = "closed";
pub const INITIATOR_TYPE_ROBOT: &str = "robot";

/// Durable record of a generated trade. Robot positions are created already
/// closed and are never updated or deleted afterwards.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub realized_pnl: f64,
    pub fees: f64,
    pub status: &'static str,
    pub initiator_type: &'static str,
    pub initiator_id: String,
}

impl Position {
    pub fn from_generated(account_id: &str, robot_id: &str, trade: &GeneratedTrade) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            open_price: trade.open_price,
            close_price: trade.close_price,
            opened_at: trade.opened_at,
            closed_at: trade.closed_at,
            realized_pnl: trade.realized_pnl,
            fees: trade.fees,
            status: POSITION_STATUS_CLOSED,
            initiator_type: INITIATOR_TYPE_ROBOT,
            initiator_id: robot_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionType {
    Profit,
    Loss,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Profit => "profit",
            TransactionType::Loss => "loss",
        }
    }
}

/// One row per run per account summarizing the aggregate P&L.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: String,
    pub account_id: String,
    pub robot_id: String,
    pub kind: TransactionType,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn from_net_pnl(account_id: &str, robot_id: &str, net_pnl: f64, at: DateTime<Utc>) -> Self {
        let kind = if net_pnl < 0.0 {
            TransactionType::Loss
        } else {
            TransactionType::Profit
        };
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            robot_id: robot_id.to_string(),
            kind,
            amount: net_pnl.abs(),
            created_at: at,
        }
    }
}

pub const AUDIT_EVENT_RUN_COMPLETED: &str = "robot_execution_completed";
pub const AUDIT_EVENT_RUN_FAILED: &str = "robot_execution_failed";

#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub robot_id: String,
    pub event: String,
    pub message: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Counters accumulated across the account loop of one run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub clients_processed: u32,
    pub clients_skipped: u32,
    pub trades_generated: u32,
    pub total_profit: f64,
    pub errors: Vec<String>,
}

impl RunStats {
    pub fn to_metadata(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Result surfaced to the manual trigger and recorded by the scheduler.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub message: String,
    pub stats: Option<RunStats>,
}

impl ExecutionOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            stats: None,
        }
    }
}
