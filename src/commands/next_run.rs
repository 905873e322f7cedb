use crate::context::AppContext;
use crate::database::LedgerStore;
use crate::executor::TIMEZONE_SETTING;
use crate::models::RobotStatus;
use crate::time_utils::{next_run_instant, resolve_timezone};
use anyhow::{anyhow, Result};
use chrono::Utc;

/// Prints the next computed fire instant for a robot without arming anything.
pub async fn run(app: &AppContext, robot_id: &str) -> Result<()> {
    let db = app.database().await?;
    let robot = db
        .get_robot(robot_id)
        .await?
        .ok_or_else(|| anyhow!("robot {} not found", robot_id))?;

    if robot.status != RobotStatus::Active {
        println!(
            "robot {} is {}; it will not be scheduled",
            robot.id,
            robot.status.as_str()
        );
        return Ok(());
    }

    let tz = resolve_timezone(db.get_setting_value(TIMEZONE_SETTING).await?.as_deref());
    let fire_at = next_run_instant(Utc::now(), robot.execution_time, tz);
    println!(
        "robot {} next run: {} ({} {})",
        robot.id, fire_at, robot.execution_time, tz
    );
    Ok(())
}
