use std::fmt;

/// ComponentState is the readiness a component reports through its SDK
/// handle. The channel aggregates these into its own lifecycle state.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ComponentState {
    #[default]
    Unspecified,

    /// The component exists but has not finished starting.
    Unstarted,

    /// The component is ready for calls.
    Started,

    /// The component failed fatally. This quarantines the whole channel.
    Failed,
}

const COMPONENT_STATE_UNSTARTED_STR: &str = "unstarted";
const COMPONENT_STATE_STARTED_STR: &str = "started";
const COMPONENT_STATE_FAILED_STR: &str = "failed";

impl From<&str> for ComponentState {
    fn from(raw: &str) -> Self {
        match raw {
            COMPONENT_STATE_UNSTARTED_STR => ComponentState::Unstarted,
            COMPONENT_STATE_STARTED_STR => ComponentState::Started,
            COMPONENT_STATE_FAILED_STR => ComponentState::Failed,
            _ => ComponentState::Unspecified,
        }
    }
}

impl From<u8> for ComponentState {
    fn from(v: u8) -> Self {
        match v {
            1 => ComponentState::Unstarted,
            2 => ComponentState::Started,
            3 => ComponentState::Failed,
            _ => ComponentState::Unspecified,
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ComponentState::Unstarted => COMPONENT_STATE_UNSTARTED_STR,
            ComponentState::Started => COMPONENT_STATE_STARTED_STR,
            ComponentState::Failed => COMPONENT_STATE_FAILED_STR,
            ComponentState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_component_state_from_str() {
        let tests = vec![
            (crate::UNSPECIFIED_STR, ComponentState::Unspecified),
            ("unstarted", ComponentState::Unstarted),
            ("started", ComponentState::Started),
            ("failed", ComponentState::Failed),
        ];

        for (state_string, expected_state) in tests {
            assert_eq!(
                ComponentState::from(state_string),
                expected_state,
                "testCase: {expected_state}",
            );
        }
    }

    #[test]
    fn test_component_state_string() {
        let tests = vec![
            (ComponentState::Unspecified, crate::UNSPECIFIED_STR),
            (ComponentState::Unstarted, "unstarted"),
            (ComponentState::Started, "started"),
            (ComponentState::Failed, "failed"),
        ];

        for (state, expected_string) in tests {
            assert_eq!(state.to_string(), expected_string)
        }
    }
}
