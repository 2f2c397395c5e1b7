pub mod checkpoint;
pub mod dedup;
pub mod derivative;
pub mod enumerator;
pub mod ingest;
pub mod migration;
pub mod regenerate;
pub mod rewrite;

pub use checkpoint::Checkpoint;
pub use dedup::{DedupOptions, DedupReport, Deduplicator};
pub use enumerator::{enumerate, enumerate_all};
pub use ingest::{IngestRequest, IngestedBundle, Ingestor};
pub use migration::{
    Identity, ItemStatus, MigrationJob, Migrator, ObjectTransform, ProgressEvent,
    RegenerateDerivatives, RunSummary,
};
pub use regenerate::{RegenerateJob, Regenerator};
pub use rewrite::{ReferenceRewriter, RewriteReport};
