pub mod api;
pub mod config;
pub mod db;
pub mod rooms;
pub mod storage;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::rooms::RoomProvider;
use crate::storage::ObjectStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rooms: Arc<dyn RoomProvider>,
    pub storage: Arc<ObjectStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: DbPool,
        rooms: Arc<dyn RoomProvider>,
        storage: Arc<ObjectStore>,
    ) -> Self {
        Self {
            config,
            db,
            rooms,
            storage,
        }
    }
}
