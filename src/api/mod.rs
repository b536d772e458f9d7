use std::sync::Arc;

use crate::channel::channel_internal::{encoding_component_id, ChannelInternal};
use crate::channel::component_sdk::ComponentSdkHandle;
use crate::channel::Channel;
use crate::component::{
    Encoding, EncodingSdk, PluginConfig, Transport, TransportSdk, UserModel, UserModelSdk,
};
use crate::error::{Error, Result};
use crate::framing::FramingMode;
use crate::sdk::ChannelSdk;

/// Creates a Transport once the channel can hand it its callback surface.
/// Mirrors a plugin's create call: the component keeps the SDK handle and
/// reports its readiness through it.
pub type TransportFactory =
    Box<dyn FnOnce(Arc<dyn TransportSdk>, &PluginConfig) -> Result<Arc<dyn Transport>> + Send + Sync>;

pub type UserModelFactory = Box<
    dyn FnOnce(Arc<dyn UserModelSdk>, &PluginConfig) -> Result<Arc<dyn UserModel>> + Send + Sync,
>;

pub type EncodingFactory =
    Box<dyn FnOnce(Arc<dyn EncodingSdk>, &PluginConfig) -> Result<Arc<dyn Encoding>> + Send + Sync>;

/// Channel-level tuning. The defaults match a composition posting to a
/// low-rate public service.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Wire layout for package bytes inside an action. Must match on both
    /// ends of a channel.
    pub framing: FramingMode,
    /// Minimum seconds of lead the driver gives encoding before an action
    /// fires. Raised automatically to the slowest composed encoding's
    /// reported `encoding_time`.
    pub max_encoding_time: f64,
    /// Seconds between read-side polls of the transport.
    pub fetch_period: f64,
    /// How far ahead (seconds) timelines are requested from the User Model.
    /// Overridden by the model's own `timeline_length` when it reports one.
    pub timeline_lookahead: f64,
    /// When false, actions with no package traffic fire bare instead of
    /// carrying filler content.
    pub cover_traffic: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            framing: FramingMode::default(),
            max_encoding_time: 0.1,
            fetch_period: 30.0,
            timeline_lookahead: 600.0,
            cover_traffic: true,
        }
    }
}

pub(crate) struct BuiltComponents {
    pub transport: Arc<dyn Transport>,
    pub user_model: Arc<dyn UserModel>,
    pub encodings: Vec<Arc<dyn Encoding>>,
}

/// The deferred component constructors a builder collected; consumed by
/// `Channel::init`.
pub(crate) struct ComponentFactories {
    transport: TransportFactory,
    user_model: UserModelFactory,
    encodings: Vec<EncodingFactory>,
}

impl ComponentFactories {
    pub(crate) fn encoding_count(&self) -> usize {
        self.encodings.len()
    }

    pub(crate) fn build(
        self,
        internal: &Arc<ChannelInternal>,
        transport_sdk: ComponentSdkHandle,
        user_model_sdk: ComponentSdkHandle,
        config: &PluginConfig,
    ) -> Result<BuiltComponents> {
        let transport = (self.transport)(Arc::new(transport_sdk), config)?;
        let user_model = (self.user_model)(Arc::new(user_model_sdk), config)?;
        let mut encodings = Vec::with_capacity(self.encodings.len());
        for (idx, factory) in self.encodings.into_iter().enumerate() {
            let sdk = ComponentSdkHandle::new(Arc::downgrade(internal), encoding_component_id(idx));
            encodings.push(factory(Arc::new(sdk), config)?);
        }
        Ok(BuiltComponents {
            transport,
            user_model,
            encodings,
        })
    }
}

/// ChannelBuilder assembles one channel composition: exactly one Transport,
/// exactly one User Model, and at least one Encoding.
///
/// ```ignore
/// let channel = ChannelBuilder::new()
///     .with_settings(ChannelSettings {
///         framing: FramingMode::Batch,
///         ..Default::default()
///     })
///     .with_transport(|sdk, _| Ok(WhiteboardTransport::new(sdk)))
///     .with_user_model(|sdk, _| Ok(PeriodicUser::new(sdk)))
///     .with_encoding(|sdk, _| Ok(JpegEncoding::new(sdk)))
///     .build(sdk)?;
/// channel.init(PluginConfig::default()).await?;
/// ```
pub struct ChannelBuilder {
    settings: ChannelSettings,
    transport: Option<TransportFactory>,
    user_model: Option<UserModelFactory>,
    encodings: Vec<EncodingFactory>,
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        ChannelBuilder::new()
    }
}

impl ChannelBuilder {
    pub fn new() -> Self {
        ChannelBuilder {
            settings: ChannelSettings::default(),
            transport: None,
            user_model: None,
            encodings: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: ChannelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.settings.framing = framing;
        self
    }

    pub fn with_transport<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<dyn TransportSdk>, &PluginConfig) -> Result<Arc<dyn Transport>>
            + Send
            + Sync
            + 'static,
    {
        self.transport = Some(Box::new(factory));
        self
    }

    pub fn with_user_model<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<dyn UserModelSdk>, &PluginConfig) -> Result<Arc<dyn UserModel>>
            + Send
            + Sync
            + 'static,
    {
        self.user_model = Some(Box::new(factory));
        self
    }

    /// Adds one encoding to the composition. Order matters: the first
    /// encoding is the wildcard (`*/*`) match.
    pub fn with_encoding<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<dyn EncodingSdk>, &PluginConfig) -> Result<Arc<dyn Encoding>>
            + Send
            + Sync
            + 'static,
    {
        self.encodings.push(Box::new(factory));
        self
    }

    /// Assembles the channel. Components are not created yet; that happens
    /// in `Channel::init`.
    pub fn build(self, sdk: Arc<dyn ChannelSdk>) -> Result<Channel> {
        let transport = self.transport.ok_or(Error::ErrMissingComponent)?;
        let user_model = self.user_model.ok_or(Error::ErrMissingComponent)?;
        if self.encodings.is_empty() {
            return Err(Error::ErrMissingComponent);
        }
        Ok(Channel::with_parts(
            self.settings,
            sdk,
            ComponentFactories {
                transport,
                user_model,
                encodings: self.encodings,
            },
        ))
    }
}
