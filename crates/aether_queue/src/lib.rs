pub mod throttled_queue;
#[cfg(test)]
mod throttled_queue_test;

pub use throttled_queue::{TaskHandle, ThrottledQueue, ThrottledQueueConfig, ThrottledQueueError};
