use std::fmt;

/// Lifecycle of a covert pathway, as reported by the Transport.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    #[default]
    Unspecified,

    /// A fresh link this node originated.
    Created,

    /// A link joined from another node's address.
    Loaded,

    /// The pathway is gone; connections on it are closed.
    Destroyed,
}

const LINK_STATUS_CREATED_STR: &str = "created";
const LINK_STATUS_LOADED_STR: &str = "loaded";
const LINK_STATUS_DESTROYED_STR: &str = "destroyed";

impl From<&str> for LinkStatus {
    fn from(raw: &str) -> Self {
        match raw {
            LINK_STATUS_CREATED_STR => LinkStatus::Created,
            LINK_STATUS_LOADED_STR => LinkStatus::Loaded,
            LINK_STATUS_DESTROYED_STR => LinkStatus::Destroyed,
            _ => LinkStatus::Unspecified,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            LinkStatus::Created => LINK_STATUS_CREATED_STR,
            LinkStatus::Loaded => LINK_STATUS_LOADED_STR,
            LinkStatus::Destroyed => LINK_STATUS_DESTROYED_STR,
            LinkStatus::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}
