//! Runtime handle management.
//!
//! A [`RuntimeHandle`] owns exactly one engine instance and the loaded
//! verification module. Each call registers its own callback function,
//! bound to one cycle of the handle's [`CallbackSlot`].

use super::{EngineFactory, HandleId, ScriptEngine};
use crate::callback::{CallbackBridge, CallbackSlot};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::module::ModuleLocator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runtime handle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No engine yet
    Uninitialized,
    /// Engine running with the module loaded
    Initialized,
    /// Engine torn down; terminal
    Closed,
}

/// One embedded engine plus its verification module
pub struct RuntimeHandle<E: ScriptEngine> {
    /// Unique handle ID for logs
    id: String,
    /// Lifecycle state
    state: HandleState,
    /// Bridge configuration
    config: BridgeConfig,
    /// Slot written by the per-call callbacks
    slot: CallbackSlot,
    /// Exports of the verification module
    module: Option<HandleId>,
    /// The engine itself
    engine: Option<E>,
    /// When the engine came up
    initialized_at: Option<DateTime<Utc>>,
}

impl<E: ScriptEngine> RuntimeHandle<E> {
    /// Create an uninitialized handle
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: HandleState::Uninitialized,
            config,
            slot: CallbackSlot::new(),
            module: None,
            engine: None,
            initialized_at: None,
        }
    }

    /// Create a handle and bring its engine up
    pub fn create<F>(factory: &F, locator: &ModuleLocator, config: BridgeConfig) -> Result<Self>
    where
        F: EngineFactory<Engine = E>,
    {
        let mut handle = Self::new(config);
        handle.init(factory, locator)?;
        Ok(handle)
    }

    /// Create the engine and load the module.
    ///
    /// A no-op when already initialized. On failure every engine resource
    /// created so far is released and the handle stays uninitialized.
    pub fn init<F>(&mut self, factory: &F, locator: &ModuleLocator) -> Result<()>
    where
        F: EngineFactory<Engine = E>,
    {
        match self.state {
            HandleState::Initialized => return Ok(()),
            HandleState::Closed => {
                return Err(BridgeError::InvalidState(
                    "Cannot initialize a closed runtime handle".into(),
                ))
            }
            HandleState::Uninitialized => {}
        }

        self.config.validate()?;
        let source = locator.resolve()?;
        let engine = factory
            .create(&self.config)
            .map_err(BridgeError::into_initialization)?;

        let module = match engine.load_module(&source) {
            Ok(module) => module,
            Err(e) => {
                engine.shutdown();
                return Err(e.into_initialization());
            }
        };

        info!(
            id = %self.id,
            engine = engine.name(),
            module = %source.name,
            digest = %source.digest,
            "Runtime handle initialized"
        );

        self.module = Some(module);
        self.engine = Some(engine);
        self.initialized_at = Some(Utc::now());
        self.state = HandleState::Initialized;
        Ok(())
    }

    /// Get the handle ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the lifecycle state
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Get the configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Get the callback slot
    pub fn slot(&self) -> &CallbackSlot {
        &self.slot
    }

    /// When the engine came up
    pub fn initialized_at(&self) -> Option<DateTime<Utc>> {
        self.initialized_at
    }

    /// The running engine
    pub fn engine(&self) -> Result<&E> {
        match (&self.engine, self.state) {
            (Some(engine), HandleState::Initialized) => Ok(engine),
            (_, state) => Err(BridgeError::InvalidState(format!(
                "Runtime handle not initialized: {:?}",
                state
            ))),
        }
    }

    /// Start a new call cycle and register its callback function.
    ///
    /// Anything a previous call left in the slot is released first. The
    /// returned callback handle is owned by the caller.
    pub fn register_callback(&self) -> Result<HandleId> {
        let engine = self.engine()?;
        let (cycle, leftover) = self.slot.begin_cycle();
        if let Some(stale) = leftover {
            warn!(id = %self.id, cycle, "Discarding callback result left over from a previous call");
            if let Some(handle) = stale.handle() {
                engine.release(handle);
            }
        }
        engine.create_callback(Arc::new(CallbackBridge::new(self.slot.clone(), cycle)))
    }

    /// End the current call cycle, releasing anything left in the slot.
    ///
    /// Callbacks of the ended cycle that fire later are refused.
    pub fn finish_call(&self) {
        let leftover = self.slot.end_cycle();
        if let (Some(engine), Some(handle)) = (&self.engine, leftover.and_then(|d| d.handle())) {
            engine.release(handle);
        }
    }

    /// Call `function` on the module with `argument` and `callback`.
    ///
    /// Returns the call's own return value; the callback may not have fired yet.
    pub fn invoke(&self, function: &str, argument: HandleId, callback: HandleId) -> Result<HandleId> {
        let engine = self.engine()?;
        let module = self.module.ok_or_else(|| {
            BridgeError::InvalidState("Runtime handle has no module loaded".into())
        })?;
        engine.call_function(module, function, &[argument, callback])
    }

    /// Service engine work until the callback has filled the slot.
    ///
    /// The engine going idle does not mean the callback fired, so the slot is
    /// checked on its own and waited on between drain passes. Returns the
    /// number of messages handled.
    pub fn drain_until_callback_fired(&self) -> Result<u64> {
        let engine = self.engine()?;
        let timeout = self.config.callback_timeout();
        let slice = self.config.drain_poll_interval();
        let started = Instant::now();
        let mut iterations = 0u64;

        let expired = || timeout.is_some_and(|limit| started.elapsed() >= limit);
        let timed_out = |iterations: u64| {
            let waited_ms = started.elapsed().as_millis() as u64;
            warn!(id = %self.id, waited_ms, iterations, "Verification callback never fired");
            BridgeError::Timeout { waited_ms }
        };

        loop {
            while engine.is_running() {
                engine.handle_message()?;
                iterations += 1;
                // A script that keeps queuing jobs must still hit the deadline.
                if expired() {
                    if self.slot.is_filled() {
                        return Ok(iterations);
                    }
                    return Err(timed_out(iterations));
                }
            }

            if self.slot.is_filled() {
                return Ok(iterations);
            }
            if expired() {
                return Err(timed_out(iterations));
            }

            let wait = match timeout {
                Some(limit) => slice.min(limit.saturating_sub(started.elapsed())),
                None => slice,
            };

            if self.slot.wait_for(wait) {
                debug!(id = %self.id, iterations, "Callback fired off the message loop");
                return Ok(iterations);
            }
        }
    }

    /// Release any undelivered callback result, the module and the engine, in that order.
    ///
    /// Idempotent; a closed handle stays closed.
    pub fn close(&mut self) {
        if self.state == HandleState::Closed {
            return;
        }

        if let Some(engine) = self.engine.take() {
            if let Some(stale) = self.slot.end_cycle().and_then(|d| d.handle()) {
                engine.release(stale);
            }
            if let Some(module) = self.module.take() {
                engine.release(module);
            }
            engine.shutdown();
            info!(id = %self.id, "Runtime handle closed");
        }

        self.state = HandleState::Closed;
    }
}

impl<E: ScriptEngine> Drop for RuntimeHandle<E> {
    fn drop(&mut self) {
        self.close();
    }
}
