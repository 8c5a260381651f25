mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{InferenceBackend, InferenceCapability};
pub use backends::SyntheticBackend;
pub use registry::BackendRegistry;
pub use result::{ClassifiedDetection, LabelCandidate, SegmentationMask, SharedMask};
