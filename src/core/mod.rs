pub mod classifier;
pub mod comparator;
pub mod engine;
pub mod events;
pub mod report;
pub mod scanner;
pub mod session;

pub use classifier::{Classifier, ClassifyOutcome, CopyFailure};
pub use comparator::{diff, Category, Partition, PartitionSummary};
pub use engine::{create_output_dir, CompareJob, CompareRequest, ComparisonResult, JobConfig};
pub use events::{
    format_size, ClassifiedFile, ComparisonEvent, EventSink, EventStream, Phase, Severity,
};
pub use report::ReportWriter;
pub use scanner::{DirectoryScanner, DirectorySnapshot, FileEntry};
pub use session::{CompareSession, RunningJob};
