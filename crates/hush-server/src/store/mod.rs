pub mod db;
pub mod model;

pub use db::{ConsumeResult, FetchResult, Store};
pub use model::MessageRecord;
