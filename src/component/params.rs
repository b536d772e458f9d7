use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ActionId, LinkId, Timestamp};

/// One scheduled opportunity to interact with the outside world, as produced
/// by the User Model and consumed by the Transport. The `config` blob is
/// opaque to the core; the Transport and User Model agree on its contents.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: ActionId,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub config: Value,
}

/// Time-ordered sequence of actions for a window, as returned by
/// `UserModel::get_timeline`.
pub type ActionTimeline = Vec<Action>;

/// Parameters of one encoding slot within an action: which link the content
/// leaves on, what content type the encoding must produce, and whether a
/// package may ride in it at all (`encode_package == false` means the slot
/// carries only cover traffic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingParameters {
    pub link_id: LinkId,
    pub mime_type: String,
    pub encode_package: bool,
    #[serde(default)]
    pub config: Value,
}

impl Default for EncodingParameters {
    fn default() -> Self {
        EncodingParameters {
            link_id: LinkId::default(),
            mime_type: "*/*".to_owned(),
            encode_package: true,
            config: Value::Null,
        }
    }
}

/// Opaque per-link parameters the Transport shares with the User Model when
/// a link is added (posting cadence hints, account identity, etc).
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkParameters {
    #[serde(default)]
    pub config: Value,
}

/// Static description of a Transport: the action names it understands and
/// the content types each accepts.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportProperties {
    pub supported_actions: HashMap<String, Vec<String>>,
}

/// Per-link facts surfaced upward alongside link status changes.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkProperties {
    /// Address another node loads to reach this link.
    pub link_address: String,
    pub reliable: bool,
    /// Rough seconds between plausible send opportunities, if known.
    #[serde(default)]
    pub send_period: Option<f64>,
}

/// Static description of a User Model's timeline behavior. Zeroes mean "use
/// the channel defaults".
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserModelProperties {
    /// How far into the future `get_timeline` is willing to plan, seconds.
    pub timeline_length: f64,
    /// How often the timeline should be refreshed, seconds.
    pub timeline_fetch_period: f64,
}

/// Static description of an Encoding.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingProperties {
    /// Worst-case seconds one `encode_bytes` call takes; drives how far
    /// ahead of an action's timestamp encoding must start.
    pub encoding_time: f64,
    pub mime_type: String,
}

/// Capacity of an encoding under concrete parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificEncodingProperties {
    /// Payload capacity in bytes for one slot with these parameters.
    pub max_bytes: u32,
}

/// An observation the Transport forwards to the User Model, e.g. rate
/// limiting or a service-side anomaly the model should react to.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Configuration handed to component factories at `init` time.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub config: Value,
}
