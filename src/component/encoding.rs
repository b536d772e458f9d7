use std::fmt;

use async_trait::async_trait;

use super::component_state::ComponentState;
use super::params::{EncodingParameters, EncodingProperties, SpecificEncodingProperties};
use super::{DecodingHandle, EncodingHandle, SdkHandle};
use crate::error::Result;

/// Outcome of an encode or decode request.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncodingStatus {
    #[default]
    Unspecified,
    Ok,
    Failed,
}

const ENCODING_STATUS_OK_STR: &str = "ok";
const ENCODING_STATUS_FAILED_STR: &str = "failed";

impl fmt::Display for EncodingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            EncodingStatus::Ok => ENCODING_STATUS_OK_STR,
            EncodingStatus::Failed => ENCODING_STATUS_FAILED_STR,
            EncodingStatus::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// Encoding turns raw bytes into content that belongs in an action (an
/// image, a forum post, ...) and back. Encodings are passive: they never
/// talk to the outside world and hold no link state.
#[async_trait]
pub trait Encoding: Send + Sync {
    fn encoding_properties(&self) -> EncodingProperties;

    /// Capacity for one slot under concrete parameters.
    fn encoding_properties_for_parameters(
        &self,
        params: &EncodingParameters,
    ) -> SpecificEncodingProperties;

    /// Encodes `bytes` into carrier content. Completion arrives through
    /// [`EncodingSdk::on_bytes_encoded`] with the same handle; completions
    /// may arrive out of order relative to requests.
    async fn encode_bytes(
        &self,
        handle: EncodingHandle,
        params: EncodingParameters,
        bytes: Vec<u8>,
    ) -> Result<()>;

    /// Extracts payload bytes from carrier content. Completion arrives
    /// through [`EncodingSdk::on_bytes_decoded`].
    async fn decode_bytes(
        &self,
        handle: DecodingHandle,
        params: EncodingParameters,
        bytes: Vec<u8>,
    ) -> Result<()>;

    async fn on_user_input_received(
        &self,
        handle: SdkHandle,
        answered: bool,
        response: &str,
    ) -> Result<()>;
}

/// The core's callback surface handed to an Encoding at creation.
#[async_trait]
pub trait EncodingSdk: Send + Sync {
    async fn update_state(&self, state: ComponentState);

    async fn on_bytes_encoded(&self, handle: EncodingHandle, bytes: Vec<u8>, status: EncodingStatus);

    async fn on_bytes_decoded(&self, handle: DecodingHandle, bytes: Vec<u8>, status: EncodingStatus);

    async fn request_plugin_user_input(
        &self,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle>;

    async fn request_common_user_input(&self, key: &str) -> Result<SdkHandle>;
}
