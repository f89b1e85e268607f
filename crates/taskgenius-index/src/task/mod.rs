//! Task cache, parse executors, query engine and the task data manager

mod cache;
mod executor;
mod manager;
mod query;

pub use cache::{DateField, FileDiff, TaskCache};
pub use executor::{build_executor, InProcessExecutor, ParseExecutor, WorkerPoolExecutor};
pub use manager::{IndexStamp, TaskDataManager, CACHE_FORMAT_VERSION};
pub use query::{query, SortCriterion, SortField, SortOrder, TaskFilter};
