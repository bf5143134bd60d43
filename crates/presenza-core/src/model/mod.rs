// ── Domain model ──

mod channel;
mod presence;

pub use channel::{ChannelId, ChannelReading, FaultKind, ReadingFault, ReadingStatus};
pub use presence::{CameraCount, OverrideState, PresenceSnapshot};
