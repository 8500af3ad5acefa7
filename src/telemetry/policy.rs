//! Route monitoring policy
//!
//! Decides, per request, whether the counter, summary and histogram get updated.
//! The in-flight gauge ignores this policy.

/// Per-route monitoring flag set by the route owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RouteMonitoring {
    /// No explicit choice; the global default applies
    #[default]
    Unset,
    /// Always measure this route
    Monitored,
    /// Never measure this route
    Unmonitored,
}

impl From<bool> for RouteMonitoring {
    fn from(monitored: bool) -> Self {
        if monitored {
            Self::Monitored
        } else {
            Self::Unmonitored
        }
    }
}

impl From<Option<bool>> for RouteMonitoring {
    fn from(flag: Option<bool>) -> Self {
        flag.map_or(Self::Unset, Self::from)
    }
}

/// Whether a request on a route carrying `flag` must be left out of the
/// request metrics.
///
/// With `monitor_all_by_default` only routes explicitly flagged as unmonitored are
/// skipped; without it only routes explicitly flagged as monitored are measured.
pub fn should_skip(monitor_all_by_default: bool, flag: RouteMonitoring) -> bool {
    if monitor_all_by_default {
        flag == RouteMonitoring::Unmonitored
    } else {
        flag != RouteMonitoring::Monitored
    }
}
