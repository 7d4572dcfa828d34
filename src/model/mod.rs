mod batch;
mod config;
mod entities;
mod error;
mod progress;
mod response;

pub use batch::*;
pub use config::*;
pub use entities::*;
pub use error::*;
pub use progress::*;
pub use response::*;
