pub mod git_track;
pub mod git_track_object;
pub mod tracking;

pub use git_track::{ClusterGitTrack, GitTrack};
pub use git_track_object::{
    ClusterGitTrackObject, ConditionReason, ConditionStatus, ConditionType,
    GitTrackObject, GitTrackObjectCondition, GitTrackObjectSpec,
    GitTrackObjectStatus,
};
pub use tracking::{TrackingKey, TrackingKind, TrackingObject};
