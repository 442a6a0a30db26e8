pub mod durable;
pub mod retry;

pub use durable::DurableStore;
pub use retry::{RetryPolicy, retry_with_policy};
