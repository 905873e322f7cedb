use crate::context::AppContext;
use anyhow::{anyhow, Result};
use log::{info, warn};

/// Manual trigger: runs one robot immediately, outside its daily cadence.
pub async fn run(app: &AppContext, robot_id: &str) -> Result<()> {
    let services = app.robot_services().await?;
    let outcome = services.executor.execute_robot(robot_id).await;

    if let Some(stats) = &outcome.stats {
        info!(
            "accounts processed: {}, skipped: {}, trades: {}, total profit: {:.2}",
            stats.clients_processed,
            stats.clients_skipped,
            stats.trades_generated,
            stats.total_profit
        );
        for error in &stats.errors {
            warn!("{}", error);
        }
    }

    if outcome.success {
        info!("{}", outcome.message);
        Ok(())
    } else {
        Err(anyhow!(outcome.message))
    }
}
