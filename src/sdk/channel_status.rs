use std::fmt;

/// Availability of the whole composition, reported upward once per
/// transition.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    #[default]
    Unspecified,

    /// Activated and accepting sends.
    Available,

    /// Deactivated; sends are rejected until re-activated.
    Unavailable,

    /// Enabled by configuration but not yet activated.
    Enabled,

    /// Disabled by configuration.
    Disabled,

    /// A component failed fatally; the channel is quarantined.
    Failed,
}

const CHANNEL_STATUS_AVAILABLE_STR: &str = "available";
const CHANNEL_STATUS_UNAVAILABLE_STR: &str = "unavailable";
const CHANNEL_STATUS_ENABLED_STR: &str = "enabled";
const CHANNEL_STATUS_DISABLED_STR: &str = "disabled";
const CHANNEL_STATUS_FAILED_STR: &str = "failed";

impl From<&str> for ChannelStatus {
    fn from(raw: &str) -> Self {
        match raw {
            CHANNEL_STATUS_AVAILABLE_STR => ChannelStatus::Available,
            CHANNEL_STATUS_UNAVAILABLE_STR => ChannelStatus::Unavailable,
            CHANNEL_STATUS_ENABLED_STR => ChannelStatus::Enabled,
            CHANNEL_STATUS_DISABLED_STR => ChannelStatus::Disabled,
            CHANNEL_STATUS_FAILED_STR => ChannelStatus::Failed,
            _ => ChannelStatus::Unspecified,
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ChannelStatus::Available => CHANNEL_STATUS_AVAILABLE_STR,
            ChannelStatus::Unavailable => CHANNEL_STATUS_UNAVAILABLE_STR,
            ChannelStatus::Enabled => CHANNEL_STATUS_ENABLED_STR,
            ChannelStatus::Disabled => CHANNEL_STATUS_DISABLED_STR,
            ChannelStatus::Failed => CHANNEL_STATUS_FAILED_STR,
            ChannelStatus::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}
