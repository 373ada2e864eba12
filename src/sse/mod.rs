pub mod models;
pub use models::*;

mod hub;
pub use hub::*;

mod snapshot;
pub use snapshot::*;

mod analytics_stream;
pub use analytics_stream::analytics_stream;
