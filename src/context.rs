use crate::database::{Database, LedgerStore};
use crate::executor::RobotExecutor;
use crate::market_data::{HttpMarketData, MarketDataSource};
use crate::scheduler::RobotScheduler;
use anyhow::{anyhow, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
}

/// The engine's wired collaborators: the ledger store plus the executor and
/// scheduler constructed around it.
pub struct RobotServices {
    pub store: Arc<dyn LedgerStore>,
    pub executor: Arc<RobotExecutor>,
    pub scheduler: Arc<RobotScheduler>,
}

impl AppContext {
    pub async fn initialize(database_url: Option<String>) -> Result<Self> {
        Ok(Self { database_url })
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.database_url.as_deref() else {
            return Err(anyhow!("DATABASE_URL must be set to run the robot engine."));
        };
        Database::new(database_url).await
    }

    /// Builds the executor and scheduler against the production store and the
    /// settings-resolved market data client.
    pub async fn robot_services(&self) -> Result<RobotServices> {
        let store: Arc<dyn LedgerStore> = Arc::new(self.database().await?);
        let settings = store.get_all_settings().await?;
        let market_data: Arc<dyn MarketDataSource> =
            Arc::new(HttpMarketData::from_settings(&settings)?);
        let executor = Arc::new(RobotExecutor::new(Arc::clone(&store), market_data));
        let scheduler = Arc::new(RobotScheduler::new(
            Arc::clone(&store),
            Arc::clone(&executor),
        ));
        Ok(RobotServices {
            store,
            executor,
            scheduler,
        })
    }
}
