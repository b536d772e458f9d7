pub mod component_state;
pub mod encoding;
pub mod params;
pub mod transport;
pub mod user_model;

use std::fmt;

use smol_str::SmolStr;

pub use component_state::ComponentState;
pub use encoding::{Encoding, EncodingSdk, EncodingStatus};
pub use params::*;
pub use transport::{Transport, TransportSdk};
pub use user_model::{UserModel, UserModelSdk};

/// Stable identifier of a channel composition.
pub type ChannelId = SmolStr;

/// Stable identifier of a covert pathway supplied by the Transport.
pub type LinkId = SmolStr;

/// Identifier of a logical flow over a Link.
pub type ConnectionId = SmolStr;

/// Seconds since the Unix epoch. Timelines are scheduled in wall-clock time
/// because actions mimic when a plausible user would act.
pub type Timestamp = f64;

/// Opaque identity of a scheduled action, stable across timeline refreshes.
pub type ActionId = u64;

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                $name(v)
            }
        }
    };
}

handle_type!(
    /// Caller-issued handle correlating an operation with its async status
    /// reports.
    SdkHandle
);

handle_type!(
    /// Handle of one bound package fragment, the unit the Transport reports
    /// delivery status against.
    PackageFragmentHandle
);

handle_type!(
    /// Handle correlating an `encode_bytes` request with its completion.
    EncodingHandle
);

handle_type!(
    /// Handle correlating a `decode_bytes` request with its completion.
    DecodingHandle
);
