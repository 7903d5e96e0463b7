//! Constructor table for transports, keyed by link kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::link::LinkKind;
#[cfg(unix)]
use crate::transport::HilTransport;
use crate::transport::{PlaybackTransport, Transport, UdpTransport};

/// Builds transports of one kind from link configs.
pub trait LinkFactory: Send + Sync {
    fn kind(&self) -> LinkKind;

    /// Check a config without acquiring any resource.
    fn validate(&self, cfg: &LinkConfig) -> Result<(), LinkError> {
        self.build(cfg).map(|_| ())
    }

    fn build(&self, cfg: &LinkConfig) -> Result<Box<dyn Transport>, LinkError>;
}

struct UdpFactory;
struct PlaybackFactory;
#[cfg(unix)]
struct HilFactory;

impl LinkFactory for UdpFactory {
    fn kind(&self) -> LinkKind {
        LinkKind::Udp
    }

    fn build(&self, cfg: &LinkConfig) -> Result<Box<dyn Transport>, LinkError> {
        Ok(Box::new(UdpTransport::from_config(cfg)?))
    }
}

impl LinkFactory for PlaybackFactory {
    fn kind(&self) -> LinkKind {
        LinkKind::Playback
    }

    fn build(&self, cfg: &LinkConfig) -> Result<Box<dyn Transport>, LinkError> {
        Ok(Box::new(PlaybackTransport::from_config(cfg)?))
    }
}

#[cfg(unix)]
impl LinkFactory for HilFactory {
    fn kind(&self) -> LinkKind {
        LinkKind::Hil
    }

    fn build(&self, cfg: &LinkConfig) -> Result<Box<dyn Transport>, LinkError> {
        Ok(Box::new(HilTransport::from_config(cfg)?))
    }
}

/// Registered link factories
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<LinkKind, Arc<dyn LinkFactory>>,
}

impl TransportRegistry {
    /// Registry without any factory.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the udp, playback and (on unix) hil transports.
    pub fn with_builtin() -> Self {
        let mut factories: HashMap<LinkKind, Arc<dyn LinkFactory>> = HashMap::new();
        factories.insert(LinkKind::Udp, Arc::new(UdpFactory));
        factories.insert(LinkKind::Playback, Arc::new(PlaybackFactory));
        #[cfg(unix)]
        factories.insert(LinkKind::Hil, Arc::new(HilFactory));
        Self { factories }
    }

    /// Add a plugin transport.
    ///
    /// Only `LinkKind::Plugin` kinds with a non-empty name are accepted, and
    /// each kind can be registered once.
    pub fn register(&mut self, factory: Arc<dyn LinkFactory>) -> Result<(), LinkError> {
        let kind = factory.kind();
        match &kind {
            LinkKind::Plugin(name) if !name.trim().is_empty() => {}
            LinkKind::Plugin(_) => {
                return Err(LinkError::invalid("plugin transport name must not be empty"));
            }
            other => {
                return Err(LinkError::invalid(format!(
                    "built-in kind '{other}' cannot be registered as a plugin"
                )));
            }
        }

        if self.factories.contains_key(&kind) {
            return Err(LinkError::invalid(format!(
                "transport '{kind}' is already registered"
            )));
        }

        tracing::info!("Registered transport {kind}");
        self.factories.insert(kind, factory);
        Ok(())
    }

    pub fn contains(&self, kind: &LinkKind) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted by name
    pub fn kinds(&self) -> Vec<LinkKind> {
        let mut kinds: Vec<LinkKind> = self.factories.keys().cloned().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    fn factory(&self, kind: &LinkKind) -> Result<&Arc<dyn LinkFactory>, LinkError> {
        self.factories
            .get(kind)
            .ok_or_else(|| LinkError::invalid(format!("no transport registered for kind '{kind}'")))
    }

    pub fn validate(&self, cfg: &LinkConfig) -> Result<(), LinkError> {
        if cfg.name.trim().is_empty() {
            return Err(LinkError::invalid("link name must not be empty"));
        }
        self.factory(&cfg.kind)?.validate(cfg)
    }

    pub fn build(&self, cfg: &LinkConfig) -> Result<Box<dyn Transport>, LinkError> {
        if cfg.name.trim().is_empty() {
            return Err(LinkError::invalid("link name must not be empty"));
        }
        self.factory(&cfg.kind)?.build(cfg)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
