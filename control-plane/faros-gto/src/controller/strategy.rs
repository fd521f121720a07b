use std::fmt;

use kube::ResourceExt;
use kube::core::DynamicObject;

/// Annotation on the desired document selecting how drift is handled.
pub const UPDATE_STRATEGY_ANNOTATION: &str = "faros.pusher.com/update-strategy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UpdateStrategy {
    /// Three-way merge patch on every reconcile.
    #[default]
    Default,
    /// Create once, never patch afterwards.
    Never,
    /// Patch in place, delete and recreate when the change is destructive.
    Recreate,
}

impl UpdateStrategy {
    /// Parse a strategy name. Unknown names resolve to `Default`.
    pub fn parse(s: &str) -> Self {
        Self::try_parse(s).unwrap_or_default()
    }

    fn try_parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "update" => Some(UpdateStrategy::Default),
            "never" => Some(UpdateStrategy::Never),
            "recreate" => Some(UpdateStrategy::Recreate),
            _ => None,
        }
    }

    /// Strategy requested by `desired`, falling back to `fallback` when the
    /// annotation is missing or unrecognised.
    pub fn resolve(desired: &DynamicObject, fallback: UpdateStrategy) -> Self {
        match desired.annotations().get(UPDATE_STRATEGY_ANNOTATION) {
            Some(v) if !v.trim().is_empty() => Self::try_parse(v).unwrap_or(fallback),
            _ => fallback,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStrategy::Default => "default",
            UpdateStrategy::Never => "never",
            UpdateStrategy::Recreate => "recreate",
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
