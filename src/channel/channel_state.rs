use std::fmt;

/// ChannelState is the lifecycle of one composition.
///
/// ```text
/// Uninitialized -> Initializing -> Unactivated -> Starting -> Activated
///                                                   Activated -> Deactivating -> Deactivated
/// ```
///
/// `Failed` is terminal and reachable from every non-terminal state; a
/// failed channel rejects all further operations.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Uninitialized,

    /// Components are being created; waiting for each to report started.
    Initializing,

    /// All components up; channel not yet activated by the caller.
    Unactivated,

    /// `activate_channel` issued; waiting for Transport and User Model to
    /// report started again.
    Starting,

    /// Fully operational: sends accepted, the driver schedules actions.
    Activated,

    /// Winding down: sends rejected, pending actions drain.
    Deactivating,

    Deactivated,

    /// A component failed fatally; quarantined.
    Failed,
}

const CHANNEL_STATE_UNINITIALIZED_STR: &str = "uninitialized";
const CHANNEL_STATE_INITIALIZING_STR: &str = "initializing";
const CHANNEL_STATE_UNACTIVATED_STR: &str = "unactivated";
const CHANNEL_STATE_STARTING_STR: &str = "starting";
const CHANNEL_STATE_ACTIVATED_STR: &str = "activated";
const CHANNEL_STATE_DEACTIVATING_STR: &str = "deactivating";
const CHANNEL_STATE_DEACTIVATED_STR: &str = "deactivated";
const CHANNEL_STATE_FAILED_STR: &str = "failed";

impl ChannelState {
    /// Whether the channel can never operate again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Deactivated | ChannelState::Failed)
    }
}

impl From<&str> for ChannelState {
    fn from(raw: &str) -> Self {
        match raw {
            CHANNEL_STATE_INITIALIZING_STR => ChannelState::Initializing,
            CHANNEL_STATE_UNACTIVATED_STR => ChannelState::Unactivated,
            CHANNEL_STATE_STARTING_STR => ChannelState::Starting,
            CHANNEL_STATE_ACTIVATED_STR => ChannelState::Activated,
            CHANNEL_STATE_DEACTIVATING_STR => ChannelState::Deactivating,
            CHANNEL_STATE_DEACTIVATED_STR => ChannelState::Deactivated,
            CHANNEL_STATE_FAILED_STR => ChannelState::Failed,
            _ => ChannelState::Uninitialized,
        }
    }
}

impl From<u8> for ChannelState {
    fn from(v: u8) -> Self {
        match v {
            1 => ChannelState::Initializing,
            2 => ChannelState::Unactivated,
            3 => ChannelState::Starting,
            4 => ChannelState::Activated,
            5 => ChannelState::Deactivating,
            6 => ChannelState::Deactivated,
            7 => ChannelState::Failed,
            _ => ChannelState::Uninitialized,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ChannelState::Uninitialized => CHANNEL_STATE_UNINITIALIZED_STR,
            ChannelState::Initializing => CHANNEL_STATE_INITIALIZING_STR,
            ChannelState::Unactivated => CHANNEL_STATE_UNACTIVATED_STR,
            ChannelState::Starting => CHANNEL_STATE_STARTING_STR,
            ChannelState::Activated => CHANNEL_STATE_ACTIVATED_STR,
            ChannelState::Deactivating => CHANNEL_STATE_DEACTIVATING_STR,
            ChannelState::Deactivated => CHANNEL_STATE_DEACTIVATED_STR,
            ChannelState::Failed => CHANNEL_STATE_FAILED_STR,
        };
        write!(f, "{s}")
    }
}
