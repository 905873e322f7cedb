use crate::database::LedgerStore;
use crate::executor::{RobotExecutor, TIMEZONE_SETTING};
use crate::models::{Robot, RobotStatus};
use crate::time_utils::{next_run_instant, resolve_timezone};
use chrono::Utc;
use chrono_tz::Tz;
use dashmap::DashMap;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Cooperative cancellation for one robot's timer task. Cancellation is only
/// observed while the task waits for its fire instant; a run already in
/// flight always completes before the task exits.
struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a cancel issued just before the
        // task starts waiting is not lost.
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct ScheduledRobot {
    token: Arc<CancelToken>,
    handle: JoinHandle<()>,
}

const LOAD_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Owns one timer task per active robot, keyed by robot id. The map itself
/// is never exposed; callers only get `schedule`/`unschedule`/`reschedule`.
pub struct RobotScheduler {
    store: Arc<dyn LedgerStore>,
    executor: Arc<RobotExecutor>,
    timers: DashMap<String, ScheduledRobot>,
}

impl RobotScheduler {
    pub fn new(store: Arc<dyn LedgerStore>, executor: Arc<RobotExecutor>) -> Self {
        Self {
            store,
            executor,
            timers: DashMap::new(),
        }
    }

    /// Arms (or re-arms) the single timer for this robot. Never fails: an
    /// inactive robot simply ends up with no timer.
    pub fn schedule(&self, robot: &Robot) {
        if robot.status != RobotStatus::Active {
            self.unschedule(&robot.id);
            info!(
                "robot {} is {}; no timer armed",
                robot.id,
                robot.status.as_str()
            );
            return;
        }

        let token = Arc::new(CancelToken::new());
        let handle = tokio::spawn(run_timer(
            robot.id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.executor),
            Arc::clone(&token),
        ));

        if let Some(previous) = self.timers.insert(
            robot.id.clone(),
            ScheduledRobot { token, handle },
        ) {
            previous.token.cancel();
        }
        info!("robot {} scheduled at {}", robot.id, robot.execution_time);
    }

    /// Cancels the robot's pending fire. A run already in flight completes;
    /// only the wait is interrupted.
    pub fn unschedule(&self, robot_id: &str) {
        if let Some((_, entry)) = self.timers.remove(robot_id) {
            entry.token.cancel();
            info!("robot {} unscheduled", robot_id);
        }
    }

    /// Re-reads the robot and either re-arms (still active) or cancels.
    pub async fn reschedule(&self, robot_id: &str) {
        match self.store.get_robot(robot_id).await {
            Ok(Some(robot)) => self.schedule(&robot),
            Ok(None) => {
                self.unschedule(robot_id);
                info!("robot {} no longer exists; timer cancelled", robot_id);
            }
            Err(err) => {
                // Leave any existing timer as is; the timer task re-reads the
                // robot before every fire anyway.
                warn!("failed to reschedule robot {}: {:#}", robot_id, err);
            }
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.timers.len()
    }

    pub fn is_scheduled(&self, robot_id: &str) -> bool {
        self.timers.contains_key(robot_id)
    }

    /// Cancels every timer and waits for in-flight runs to finish.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.timers.iter().map(|entry| entry.key().clone()).collect();
        let mut handles = Vec::new();
        for key in keys {
            if let Some((_, entry)) = self.timers.remove(&key) {
                entry.token.cancel();
                handles.push(entry.handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Self-sustaining daily cadence for one robot: compute the next fire
/// instant, wait, execute, re-read the robot and go again while it stays
/// active. Time zone and execution time are re-read on every lap, so
/// configuration changes and daylight-saving shifts are absorbed without any
/// external cron.
async fn run_timer(
    robot_id: String,
    store: Arc<dyn LedgerStore>,
    executor: Arc<RobotExecutor>,
    token: Arc<CancelToken>,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let robot = match store.get_robot(&robot_id).await {
            Ok(Some(robot)) if robot.status == RobotStatus::Active => robot,
            Ok(_) => {
                info!("robot {} is gone or inactive; timer exits", robot_id);
                break;
            }
            Err(err) => {
                // A transient store failure must not permanently disarm the
                // robot; try again shortly unless cancelled meanwhile.
                warn!(
                    "robot {}: failed to load before arming: {:#}; retrying in {}s",
                    robot_id,
                    err,
                    LOAD_RETRY_DELAY.as_secs()
                );
                tokio::select! {
                    _ = tokio::time::sleep(LOAD_RETRY_DELAY) => continue,
                    _ = token.notify.notified() => break,
                }
            }
        };

        let tz = read_timezone(store.as_ref()).await;
        let now = Utc::now();
        let fire_at = next_run_instant(now, robot.execution_time, tz);
        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        info!(
            "robot {} armed for {} ({}s from now)",
            robot_id,
            fire_at,
            delay.as_secs()
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.notify.notified() => break,
        }
        if token.is_cancelled() {
            break;
        }

        let outcome = executor.execute_robot(&robot_id).await;
        if outcome.success {
            info!("robot {} fired: {}", robot_id, outcome.message);
        } else {
            // One failed run never stops future runs; the loop re-arms as
            // long as the robot stays active.
            warn!("robot {} fired with failure: {}", robot_id, outcome.message);
        }
    }
}

async fn read_timezone(store: &dyn LedgerStore) -> Tz {
    match store.get_setting_value(TIMEZONE_SETTING).await {
        Ok(value) => resolve_timezone(value.as_deref()),
        Err(err) => {
            warn!("failed to read platform time zone: {:#}; using UTC", err);
            resolve_timezone(None)
        }
    }
}
