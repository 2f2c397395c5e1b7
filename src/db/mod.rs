pub mod images;
#[cfg(test)]
pub mod memory;
pub mod pool;
pub mod references;

pub use images::ImageRepository;
pub use pool::create_pool;
pub use references::{ReferenceStore, RewriteTarget, REWRITE_TARGETS};
