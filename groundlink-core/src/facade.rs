//! Application-wide access point to the link manager.
//!
//! The facade is created once by the application bootstrap and handed to
//! whoever needs links. It owns the single [`LinkManager`] between
//! `initialize` and `terminate`:
//!
//! ```text
//! Uninitialized --initialize--> Active --terminate--> Terminated
//! ```
//!
//! `Terminated` is final; a new facade is needed to start over.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ManagerConfig;
use crate::consumer::Consumer;
use crate::error::LinkError;
use crate::factory::TransportRegistry;
use crate::link::LinkSummary;
use crate::manager::{LinkManager, ShutdownReport};

enum FacadeState {
    Uninitialized,
    Active(Arc<LinkManager>),
    Terminated,
}

pub struct LinkManagerFacade {
    config: ManagerConfig,
    transports: TransportRegistry,
    state: Mutex<FacadeState>,
}

impl LinkManagerFacade {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_transports(config, TransportRegistry::with_builtin())
    }

    /// Facade whose manager will use `transports` instead of the built-ins.
    pub fn with_transports(config: ManagerConfig, transports: TransportRegistry) -> Self {
        Self {
            config,
            transports,
            state: Mutex::new(FacadeState::Uninitialized),
        }
    }

    /// Create the manager, or return the existing one.
    pub fn initialize(&self) -> Result<Arc<LinkManager>, LinkError> {
        let mut state = self.lock();
        match &*state {
            FacadeState::Active(manager) => Ok(Arc::clone(manager)),
            FacadeState::Terminated => Err(LinkError::ManagerShuttingDown),
            FacadeState::Uninitialized => {
                let manager = Arc::new(LinkManager::with_transports(
                    self.config.clone(),
                    self.transports.clone(),
                ));
                tracing::info!("Link manager initialized");
                *state = FacadeState::Active(Arc::clone(&manager));
                Ok(manager)
            }
        }
    }

    /// The live manager, if initialized and not yet terminated.
    pub fn manager(&self) -> Result<Arc<LinkManager>, LinkError> {
        match &*self.lock() {
            FacadeState::Active(manager) => Ok(Arc::clone(manager)),
            _ => Err(LinkError::NotInitialized),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(&*self.lock(), FacadeState::Active(_))
    }

    /// Consumer handle on the live manager's packet stream.
    pub fn consumer(&self) -> Result<Consumer, LinkError> {
        Ok(Consumer::new(self.manager()?))
    }

    /// Links of the live manager; empty when there is none.
    pub fn list_links(&self) -> Vec<LinkSummary> {
        self.manager()
            .map(|m| m.enumerate_links())
            .unwrap_or_default()
    }

    /// Shut the manager down and release it.
    ///
    /// Returns `None` if there was no live manager.
    pub async fn terminate(&self) -> Option<ShutdownReport> {
        let manager = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, FacadeState::Terminated) {
                FacadeState::Active(manager) => manager,
                _ => return None,
            }
        };

        let report = manager.shutdown().await;
        tracing::info!("Link manager terminated");
        Some(report)
    }

    fn lock(&self) -> MutexGuard<'_, FacadeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
