use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::{oneshot, watch};

use super::live::{Revisions, Table};
use super::migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    revisions: watch::Sender<Revisions>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        if self.sender.send(DbCommand::Shutdown).is_err() {
            error!("Database worker stopped before shutdown was requested");
        }
        if worker.join().is_err() {
            error!("Database worker panicked");
        }
    }
}

enum Location {
    File(PathBuf),
    Memory,
}

/// Handle to the SQLite worker thread. Cloning is cheap; every clone talks to
/// the same connection.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Option<Arc<PathBuf>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let database = Self::spawn(Location::File(db_path.clone()))?;
        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            db_path: Some(Arc::new(db_path)),
            ..database
        })
    }

    /// Private in-memory database, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::spawn(Location::Memory)
    }

    fn spawn(location: Location) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let worker = thread::Builder::new()
            .name("buteyko-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&location) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                serve(&mut conn, command_rx);
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        let (revisions, _) = watch::channel(Revisions::default());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
                revisions,
            }),
            db_path: None,
        })
    }

    /// `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref().map(PathBuf::as_path)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Records a committed write so live queries over `tables` re-run.
    pub(crate) fn notify(&self, tables: &[Table]) {
        self.inner.revisions.send_modify(|revisions| {
            for table in tables {
                revisions.bump(*table);
            }
        });
    }

    pub(crate) fn revisions(&self) -> watch::Receiver<Revisions> {
        self.inner.revisions.subscribe()
    }
}

fn open_connection(location: &Location) -> Result<Connection> {
    let mut conn = match location {
        Location::File(path) => Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {}", path.display()))?,
        Location::Memory => {
            Connection::open_in_memory().context("failed to open in-memory SQLite database")?
        }
    };

    if matches!(location, Location::File(_)) {
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!("Failed to enable WAL mode: {err}");
        }
    }
    // Loops rely on ON DELETE CASCADE.
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    run_migrations(&mut conn).context("failed to run database migrations")?;

    Ok(conn)
}

/// Runs queued tasks until shutdown or until every sender is gone.
fn serve(conn: &mut Connection, commands: mpsc::Receiver<DbCommand>) {
    for command in commands {
        match command {
            DbCommand::Execute(task) => task(conn),
            DbCommand::Shutdown => break,
        }
    }
    info!("Database thread shutting down");
}
