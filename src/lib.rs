pub mod control_pause;
pub mod db;
pub mod exercise;
pub mod history;
pub mod settings;
pub mod timer;
pub mod utils;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use control_pause::ControlPauseController;
use db::Database;
use exercise::{ExerciseController, ExerciseError};
use history::{ChartsFeed, HistoryDetail, HistoryFeed};
use settings::SettingsStore;

pub use utils::logging::init_logging;

/// Overrides the data directory used by [`AppState::from_env`].
pub const DATA_DIR_ENV: &str = "BUTEYKO_DATA_DIR";

const DATABASE_FILE: &str = "buteyko.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

/// Everything a front end needs, wired to one data directory.
pub struct AppState {
    pub db: Database,
    pub settings: SettingsStore,
    pub control_pause: ControlPauseController,
    pub history: HistoryFeed,
    pub charts: ChartsFeed,
}

impl AppState {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let database = Database::new(data_dir.join(DATABASE_FILE))?;

        // Drop sessions left without loops when the process last stopped
        // mid-exercise.
        let swept = database.delete_empty_sessions().await?;
        if swept > 0 {
            warn!("Removed {swept} unfinished exercise session(s) from a previous run");
        }

        let settings_store = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let settings = settings_store.get();

        let control_pause = ControlPauseController::new(database.clone(), settings.clone()).await?;
        let history = HistoryFeed::new(database.clone(), settings.subscription_grace());
        let charts = ChartsFeed::new(database.clone(), settings.subscription_grace());

        if let Some(path) = database.path() {
            info!("Opened Buteyko data at {}", path.display());
        }

        Ok(Self {
            db: database,
            settings: settings_store,
            control_pause,
            history,
            charts,
        })
    }

    /// Opens the directory named by `BUTEYKO_DATA_DIR`.
    pub async fn from_env() -> Result<Self> {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .with_context(|| format!("{DATA_DIR_ENV} is not set"))?;
        Self::open(data_dir).await
    }

    /// Starts a new exercise flow. A positive `initial_cp` skips the
    /// pre-check measurement.
    pub async fn exercise(&self, initial_cp: Option<f64>) -> Result<ExerciseController, ExerciseError> {
        ExerciseController::launch(self.db.clone(), self.settings.get(), initial_cp).await
    }

    pub async fn history_detail(&self, kind: Option<&str>, id: Option<i64>) -> HistoryDetail {
        HistoryDetail::load(self.db.clone(), kind, id).await
    }
}
