//! Rate-limited, retrying batch crawler of GitHub repository star counts.

mod infrastructure;
mod interface;
mod model;

pub use infrastructure::*;
pub use interface::*;
pub use model::*;
