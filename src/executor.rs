use crate::allocation::allocate;
use crate::config::GeneratorSettings;
use crate::database::LedgerStore;
use crate::market_data::MarketDataSource;
use crate::materializer::materialize;
use crate::models::{
    AuditLogEntry, Candle, ExecutionOutcome, Position, Robot, RobotStatus, RunStats,
    TransactionRecord, AUDIT_EVENT_RUN_COMPLETED, AUDIT_EVENT_RUN_FAILED,
};
use crate::retry::retry_store_operation;
use crate::time_utils::{resolve_timezone, trade_window_bounds};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

pub const TIMEZONE_SETTING: &str = "timezone";

/// Per-account run parameters derived from the robot configuration before
/// the allocation engine is invoked.
#[derive(Debug, Clone, Copy)]
pub struct RunPlan {
    pub trade_count: u32,
    pub target_profit: f64,
    pub win_count: usize,
    pub loss_count: usize,
}

/// Derives how many trades to fabricate, the net target and the win/loss
/// split. A win count that rounds to zero against a positive target would be
/// infeasible downstream, so it is forced to one here rather than letting
/// the allocation engine reject the run.
pub fn derive_run_plan(robot: &Robot, rng: &mut impl Rng) -> RunPlan {
    let lower = robot.min_trades_per_day.max(1);
    let upper = robot.max_trades_per_day.max(lower);
    let trade_count = rng.gen_range(lower..=upper);

    let (profit_min, profit_max) = if robot.profit_range_max >= robot.profit_range_min {
        (robot.profit_range_min, robot.profit_range_max)
    } else {
        (robot.profit_range_max, robot.profit_range_min)
    };
    let target_profit = rng.gen_range(profit_min..=profit_max);

    let win_rate = robot.win_rate.clamp(0.0, 100.0);
    let mut win_count = ((trade_count as f64 * win_rate) / 100.0).round() as usize;
    win_count = win_count.min(trade_count as usize);
    if win_count == 0 && target_profit > 0.0 {
        win_count = 1;
    }

    RunPlan {
        trade_count,
        target_profit,
        win_count,
        loss_count: trade_count as usize - win_count,
    }
}

/// Runs robots across their assigned accounts. Explicitly constructed with
/// its collaborators so tests can substitute both seams.
pub struct RobotExecutor {
    store: Arc<dyn LedgerStore>,
    market_data: Arc<dyn MarketDataSource>,
}

impl RobotExecutor {
    pub fn new(store: Arc<dyn LedgerStore>, market_data: Arc<dyn MarketDataSource>) -> Self {
        Self { store, market_data }
    }

    /// Executes one robot across all its active assignments. Never returns an
    /// error: configuration problems come back as `success == false`, and an
    /// unexpected failure escaping the run is converted to one after being
    /// written to the audit trail, so a scheduled fire can never crash the
    /// scheduler.
    pub async fn execute_robot(&self, robot_id: &str) -> ExecutionOutcome {
        match self.run(robot_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("robot {} execution failed: {:#}", robot_id, err);
                let entry = AuditLogEntry {
                    robot_id: robot_id.to_string(),
                    event: AUDIT_EVENT_RUN_FAILED.to_string(),
                    message: format!("{:#}", err),
                    metadata: None,
                    created_at: Utc::now(),
                };
                if let Err(audit_err) = self.store.insert_audit_log(&entry).await {
                    error!(
                        "robot {}: failed to record failed run: {:#}",
                        robot_id, audit_err
                    );
                }
                ExecutionOutcome::failure(format!("robot execution failed: {:#}", err))
            }
        }
    }

    async fn run(&self, robot_id: &str) -> Result<ExecutionOutcome> {
        let Some(robot) = self.store.get_robot(robot_id).await? else {
            return Ok(ExecutionOutcome::failure(format!(
                "robot {} not found",
                robot_id
            )));
        };
        if robot.status != RobotStatus::Active {
            return Ok(ExecutionOutcome::failure(format!(
                "robot {} is {}, not active",
                robot.id,
                robot.status.as_str()
            )));
        }

        let assignments = self.store.get_robot_assignments(&robot.id).await?;
        let settings_map = self.store.get_all_settings().await?;
        let generator = GeneratorSettings::from_settings_map(&settings_map)
            .context("invalid generator settings")?;
        let tz = resolve_timezone(settings_map.get(TIMEZONE_SETTING).map(String::as_str));

        let now = Utc::now();
        let (window_start, window_end) =
            trade_window_bounds(now, robot.trade_window_start, robot.trade_window_end, tz)?;

        let mut rng = StdRng::from_entropy();
        let mut candle_cache: HashMap<String, Vec<Candle>> = HashMap::new();
        let mut stats = RunStats::default();

        for assignment in &assignments {
            let result = self
                .process_account(
                    &robot,
                    &generator,
                    &assignment.account_id,
                    window_start,
                    window_end,
                    &mut candle_cache,
                    &mut rng,
                    now,
                )
                .await;
            match result {
                Ok((trade_count, net_pnl)) => {
                    stats.clients_processed += 1;
                    stats.trades_generated += trade_count;
                    stats.total_profit += net_pnl;
                    info!(
                        "robot {}: account {} received {} trade(s), net {:.2}",
                        robot.id, assignment.account_id, trade_count, net_pnl
                    );
                }
                Err(err) => {
                    stats.clients_skipped += 1;
                    let note = format!("account {}: {:#}", assignment.account_id, err);
                    warn!("robot {}: {}", robot.id, note);
                    stats.errors.push(note);
                }
            }
        }

        let stamp_result = retry_store_operation!(
            format!("stamp last run for robot {}", robot.id),
            async { self.store.update_robot_last_run(&robot.id, now).await }
        );
        if let Err(err) = stamp_result {
            let note = format!("failed to stamp last run: {:#}", err);
            warn!("robot {}: {}", robot.id, note);
            stats.errors.push(note);
        }

        let message = format!(
            "Processed {} account(s), skipped {}, generated {} trade(s), total profit {:.2}",
            stats.clients_processed,
            stats.clients_skipped,
            stats.trades_generated,
            stats.total_profit
        );
        let audit = AuditLogEntry {
            robot_id: robot.id.clone(),
            event: AUDIT_EVENT_RUN_COMPLETED.to_string(),
            message: message.clone(),
            metadata: Some(stats.to_metadata()),
            created_at: now,
        };
        let audit_result = retry_store_operation!(
            format!("write audit log for robot {}", robot.id),
            async { self.store.insert_audit_log(&audit).await }
        );
        if let Err(err) = audit_result {
            warn!("robot {}: failed to write audit log: {:#}", robot.id, err);
        }

        info!("robot {} run complete: {}", robot.id, message);
        Ok(ExecutionOutcome {
            success: true,
            message,
            stats: Some(stats),
        })
    }

    /// Generates and persists one account's batch. Any error here is caught
    /// by the caller, recorded and skipped; it never aborts the other
    /// accounts of the run.
    #[allow(clippy::too_many_arguments)]
    async fn process_account(
        &self,
        robot: &Robot,
        generator: &GeneratorSettings,
        account_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        candle_cache: &mut HashMap<String, Vec<Candle>>,
        rng: &mut StdRng,
        now: DateTime<Utc>,
    ) -> Result<(u32, f64)> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| anyhow!("account not found"))?;
        if account.balance < robot.min_account_balance {
            bail!(
                "balance {:.2} below robot minimum {:.2}",
                account.balance,
                robot.min_account_balance
            );
        }

        let plan = derive_run_plan(robot, rng);
        let allocation = allocate(
            plan.target_profit,
            plan.win_count,
            plan.loss_count,
            generator,
            rng,
        )?;

        // Interleave wins and losses so the day's ledger is not trivially
        // patterned as all-losses-then-wins.
        let mut entries: Vec<(f64, bool)> = allocation
            .win_amounts
            .iter()
            .map(|amount| (*amount, true))
            .chain(allocation.loss_amounts.iter().map(|amount| (*amount, false)))
            .collect();
        entries.shuffle(rng);

        let mut positions = Vec::with_capacity(entries.len());
        let mut net_pnl = 0.0;
        for (magnitude, is_win) in entries {
            let symbol = robot
                .symbols
                .choose(rng)
                .ok_or_else(|| anyhow!("robot has no symbols configured"))?
                .clone();
            let candles = self
                .candles_for(candle_cache, &symbol, window_start, window_end)
                .await?;
            let trade = materialize(
                &symbol,
                magnitude,
                is_win,
                candles,
                window_start,
                window_end,
                generator,
                rng,
            )?;
            net_pnl += trade.realized_pnl;
            positions.push(Position::from_generated(&account.id, &robot.id, &trade));
        }

        let transaction = TransactionRecord::from_net_pnl(&account.id, &robot.id, net_pnl, now);
        let new_real_balance = account.real_balance + net_pnl;
        let new_balance = new_real_balance + account.demo_balance + account.bonus_balance;

        retry_store_operation!(
            format!("persist run results for account {}", account.id),
            async {
                self.store
                    .persist_account_run(
                        &account.id,
                        &positions,
                        &transaction,
                        new_real_balance,
                        new_balance,
                    )
                    .await
            }
        )?;

        Ok((positions.len() as u32, net_pnl))
    }

    async fn candles_for<'a>(
        &self,
        candle_cache: &'a mut HashMap<String, Vec<Candle>>,
        symbol: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<&'a [Candle]> {
        if !candle_cache.contains_key(symbol) {
            let candles = self
                .market_data
                .get_historical_candles(symbol, window_start, window_end)
                .await
                .with_context(|| format!("failed to fetch candles for {}", symbol))?;
            candle_cache.insert(symbol.to_string(), candles);
        }
        Ok(candle_cache
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }
}
