use crate::error::{constants, ProtocolError, Result};
use crate::protocol::events::ProcessedPacket;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&ProcessedPacket) + Send + Sync + 'static;

/// Processed-packet callback registry.
///
/// Global handlers see every packet; typed handlers only packets of their
/// `packet_type`. Handlers run outside the registry lock, so a handler may
/// register further handlers.
pub struct Dispatcher {
    global: RwLock<Vec<Arc<HandlerFn>>>,
    by_type: RwLock<HashMap<u16, Vec<Arc<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            global: RwLock::new(Vec::new()),
            by_type: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&ProcessedPacket) + Send + Sync + 'static,
    {
        let mut handlers = self
            .global
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_LOCK_POISONED))?;
        handlers.push(Arc::new(handler));
        Ok(())
    }

    pub fn register_for_type<F>(&self, packet_type: u16, handler: F) -> Result<()>
    where
        F: Fn(&ProcessedPacket) + Send + Sync + 'static,
    {
        let mut handlers = self
            .by_type
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_LOCK_POISONED))?;
        handlers
            .entry(packet_type)
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Invoke every matching handler. Returns how many ran.
    pub fn dispatch(&self, packet: &ProcessedPacket) -> Result<usize> {
        let mut matched: Vec<Arc<HandlerFn>> = {
            let handlers = self
                .global
                .read()
                .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_LOCK_POISONED))?;
            handlers.clone()
        };

        {
            let handlers = self
                .by_type
                .read()
                .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_LOCK_POISONED))?;
            if let Some(typed) = handlers.get(&packet.packet_type) {
                matched.extend(typed.iter().cloned());
            }
        }

        for handler in &matched {
            handler(packet);
        }
        Ok(matched.len())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let global = self.global.read().map(|h| h.len()).unwrap_or_default();
        let typed = self.by_type.read().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("Dispatcher")
            .field("global_handlers", &global)
            .field("typed_routes", &typed)
            .finish()
    }
}
