mod crawler;
mod fetcher;
mod persister;
mod progress_store;

pub use crawler::*;
pub use fetcher::*;
pub use persister::*;
pub use progress_store::*;
