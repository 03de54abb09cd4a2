pub mod errors;
pub mod ids;
pub mod labels;
pub mod messages;
pub mod vision;

pub use errors::{StartMessageError, VisionError};
pub use ids::{ConnectionId, SessionId};
pub use labels::{FrameCounts, LabelVocabulary};
pub use messages::{FrameMessage, StartMessage, StartRequest, UploadResponse};
pub use vision::{BoundingBox, Detection, Detector, Frame, FrameSource, VideoOpener};
