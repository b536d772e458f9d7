use std::fmt;

/// Lifecycle of a logical flow over a link.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Unspecified,
    Open,
    Closed,
}

const CONNECTION_STATUS_OPEN_STR: &str = "open";
const CONNECTION_STATUS_CLOSED_STR: &str = "closed";

impl From<&str> for ConnectionStatus {
    fn from(raw: &str) -> Self {
        match raw {
            CONNECTION_STATUS_OPEN_STR => ConnectionStatus::Open,
            CONNECTION_STATUS_CLOSED_STR => ConnectionStatus::Closed,
            _ => ConnectionStatus::Unspecified,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ConnectionStatus::Open => CONNECTION_STATUS_OPEN_STR,
            ConnectionStatus::Closed => CONNECTION_STATUS_CLOSED_STR,
            ConnectionStatus::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}
