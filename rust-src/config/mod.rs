//! Configuration for a sync run.

mod settings;

#[allow(unused_imports)]
pub use settings::{
    default_source_db_path,
    default_store_root,
    AppConfig,
    ConfigError,
    SourceBackend,
    SourceConfig,
    StoreBackend,
    StoreConfig,
    SyncConfig,
    DEFAULT_CONTAINER,
    DEFAULT_DAYS_BACK,
    DEFAULT_DAYS_PER_BATCH,
    DEFAULT_KEY,
    DEFAULT_TABLE,
};
