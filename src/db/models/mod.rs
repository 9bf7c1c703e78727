pub mod journal;
pub mod session;

pub use journal::{AnalysisRecord, CaptureRecord};
pub use session::SessionRecord;
