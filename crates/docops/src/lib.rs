//! Built-in executor library
//!
//! Mechanically-expressible document operations the engine ships with.
//! OCR and AI capabilities are external: callers register their own
//! executors for those operation names.

mod delay;
mod extract;
mod merge;
mod split;

pub use delay::DelayExecutor;
pub use extract::TextExtractExecutor;
pub use merge::MergeExecutor;
pub use split::SplitExecutor;

use docruntime::ExecutorRegistry;
use std::sync::Arc;

/// Register all built-in executors with a registry.
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(Arc::new(MergeExecutor));
    registry.register(Arc::new(SplitExecutor));
    registry.register(Arc::new(TextExtractExecutor));
    registry.register(Arc::new(DelayExecutor));
}
