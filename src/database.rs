use crate::models::{
    Account, AuditLogEntry, Position, Robot, RobotAssignment, RobotStatus, TransactionRecord,
};
use crate::time_utils::TimeOfDay;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::error;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};

/// Narrow persistence contract the engine needs from the back-office ledger.
/// The engine only ever reads robot configuration and writes run results;
/// nothing here updates or deletes previously created positions or
/// transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_robots(&self) -> Result<Vec<Robot>>;
    async fn get_robot(&self, robot_id: &str) -> Result<Option<Robot>>;
    async fn update_robot_last_run(&self, robot_id: &str, at: DateTime<Utc>) -> Result<()>;
    /// Active assignment rows only.
    async fn get_robot_assignments(&self, robot_id: &str) -> Result<Vec<RobotAssignment>>;
    async fn get_account(&self, account_id: &str) -> Result<Option<Account>>;
    /// Persists one account's run results as a single atomic unit: all
    /// position inserts, the summary transaction and the balance update
    /// either land together or not at all.
    async fn persist_account_run(
        &self,
        account_id: &str,
        positions: &[Position],
        transaction: &TransactionRecord,
        new_real_balance: f64,
        new_balance: f64,
    ) -> Result<()>;
    async fn insert_audit_log(&self, entry: &AuditLogEntry) -> Result<()>;
    async fn get_setting_value(&self, key: &str) -> Result<Option<String>>;
    async fn get_all_settings(&self) -> Result<HashMap<String, String>>;
}

pub struct Database {
    client: Mutex<Client>,
}

const ROBOT_COLUMNS: &str = "id, name, status, execution_time, min_account_balance, \
     min_trades_per_day, max_trades_per_day, profit_range_min, profit_range_max, \
     win_rate, trade_window_start, trade_window_end, symbols, last_run_at";

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

fn row_to_robot(row: &Row) -> Result<Robot> {
    let status_raw: String = row.get(2);
    let execution_time_raw: String = row.get(3);
    let window_start_raw: String = row.get(10);
    let window_end_raw: String = row.get(11);
    let robot_id: String = row.get(0);

    Ok(Robot {
        id: robot_id.clone(),
        name: row.get(1),
        status: RobotStatus::parse(&status_raw)
            .with_context(|| format!("robot {} has invalid status", robot_id))?,
        execution_time: TimeOfDay::parse(&execution_time_raw)
            .with_context(|| format!("robot {} has invalid execution time", robot_id))?,
        min_account_balance: row.get(4),
        min_trades_per_day: u32::try_from(row.get::<_, i32>(5))
            .map_err(|_| anyhow!("robot {} has negative min_trades_per_day", robot_id))?,
        max_trades_per_day: u32::try_from(row.get::<_, i32>(6))
            .map_err(|_| anyhow!("robot {} has negative max_trades_per_day", robot_id))?,
        profit_range_min: row.get(7),
        profit_range_max: row.get(8),
        win_rate: row.get(9),
        trade_window_start: TimeOfDay::parse(&window_start_raw)
            .with_context(|| format!("robot {} has invalid trade window start", robot_id))?,
        trade_window_end: TimeOfDay::parse(&window_end_raw)
            .with_context(|| format!("robot {} has invalid trade window end", robot_id))?,
        symbols: row.get(12),
        last_run_at: row.get(13),
    })
}

fn row_to_account(row: &Row) -> Account {
    Account {
        id: row.get(0),
        real_balance: row.get(1),
        demo_balance: row.get(2),
        bonus_balance: row.get(3),
        balance: row.get(4),
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn get_robots(&self) -> Result<Vec<Robot>> {
        let client = self.client.lock().await;
        let statement = format!("SELECT {} FROM robots ORDER BY id", ROBOT_COLUMNS);
        let rows = client.query(statement.as_str(), &[]).await?;
        rows.iter().map(row_to_robot).collect()
    }

    async fn get_robot(&self, robot_id: &str) -> Result<Option<Robot>> {
        let client = self.client.lock().await;
        let statement = format!("SELECT {} FROM robots WHERE id = $1", ROBOT_COLUMNS);
        let row = client.query_opt(statement.as_str(), &[&robot_id]).await?;
        row.as_ref().map(row_to_robot).transpose()
    }

    async fn update_robot_last_run(&self, robot_id: &str, at: DateTime<Utc>) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "UPDATE robots SET last_run_at = $2 WHERE id = $1",
                &[&robot_id, &at],
            )
            .await?;
        Ok(())
    }

    async fn get_robot_assignments(&self, robot_id: &str) -> Result<Vec<RobotAssignment>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT robot_id, account_id, is_active
                 FROM robot_assignments
                 WHERE robot_id = $1 AND is_active = TRUE
                 ORDER BY account_id",
                &[&robot_id],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| RobotAssignment {
                robot_id: row.get(0),
                account_id: row.get(1),
                is_active: row.get(2),
            })
            .collect())
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, real_balance, demo_balance, bonus_balance, balance
                 FROM accounts WHERE id = $1",
                &[&account_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_account))
    }

    async fn persist_account_run(
        &self,
        account_id: &str,
        positions: &[Position],
        transaction: &TransactionRecord,
        new_real_balance: f64,
        new_balance: f64,
    ) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        for position in positions {
            tx.execute(
                "INSERT INTO positions (id, account_id, symbol, side, quantity, open_price, \
                 close_price, opened_at, closed_at, realized_pnl, fees, status, \
                 initiator_type, initiator_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                &[
                    &position.id,
                    &position.account_id,
                    &position.symbol,
                    &position.side.as_str(),
                    &position.quantity,
                    &position.open_price,
                    &position.close_price,
                    &position.opened_at,
                    &position.closed_at,
                    &position.realized_pnl,
                    &position.fees,
                    &position.status,
                    &position.initiator_type,
                    &position.initiator_id,
                ],
            )
            .await?;
        }

        tx.execute(
            "INSERT INTO transactions (id, account_id, robot_id, type, amount, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &transaction.id,
                &transaction.account_id,
                &transaction.robot_id,
                &transaction.kind.as_str(),
                &transaction.amount,
                &transaction.created_at,
            ],
        )
        .await?;

        tx.execute(
            "UPDATE accounts SET real_balance = $2, balance = $3 WHERE id = $1",
            &[&account_id, &new_real_balance, &new_balance],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_audit_log(&self, entry: &AuditLogEntry) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO audit_logs (robot_id, event, message, metadata, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &entry.robot_id,
                    &entry.event,
                    &entry.message,
                    &entry.metadata,
                    &entry.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_setting_value(&self, key: &str) -> Result<Option<String>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT value FROM settings WHERE setting_key = $1", &[&key])
            .await?;
        Ok(row.map(|row| row.get::<_, String>(0)))
    }

    async fn get_all_settings(&self) -> Result<HashMap<String, String>> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT setting_key, value FROM settings", &[])
            .await?;
        let mut settings = HashMap::with_capacity(rows.len());
        for row in rows {
            settings.insert(row.get::<_, String>(0), row.get::<_, String>(1));
        }
        Ok(settings)
    }
}
