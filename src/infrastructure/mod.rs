mod crawler_batch;
mod fetcher_graphql;
mod persister_factory;
mod persister_postgresql;
mod persister_sqlite;
mod progress_store_json;
mod quota_tracker;
mod retrier;
mod shutdown;

pub use crawler_batch::*;
pub use fetcher_graphql::*;
pub use persister_factory::*;
pub use persister_postgresql::*;
pub use persister_sqlite::*;
pub use progress_store_json::*;
pub use quota_tracker::*;
pub use retrier::*;
pub use shutdown::*;
