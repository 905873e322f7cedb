use crate::context::AppContext;
use crate::models::RobotStatus;
use anyhow::{Context, Result};
use log::info;

/// Scheduler daemon: arms a timer for every active robot and runs until
/// interrupted. Robots pause/resume through configuration; the timer tasks
/// notice on their next lap without a restart.
pub async fn run(app: &AppContext) -> Result<()> {
    let services = app.robot_services().await?;
    let robots = services.store.get_robots().await?;

    let mut armed = 0usize;
    for robot in &robots {
        if robot.status == RobotStatus::Active {
            services.scheduler.schedule(robot);
            armed += 1;
        }
    }
    info!(
        "{} of {} robot(s) scheduled; press Ctrl-C to stop",
        armed,
        robots.len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down; waiting for in-flight runs");
    services.scheduler.shutdown().await;
    Ok(())
}
