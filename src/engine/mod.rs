//! Embedded engine management.
//!
//! This module defines the [`ScriptEngine`] seam every backend implements,
//! the opaque [`HandleId`] used to refer to engine-owned values, and the
//! [`RuntimeHandle`] that owns one engine plus its loaded verification module.

pub mod runtime;
pub mod scoped;

#[cfg(feature = "quickjs")]
pub mod quickjs;

use crate::callback::CallbackSink;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::module::ModuleSource;
use std::fmt;
use std::sync::Arc;

pub use runtime::{HandleState, RuntimeHandle};
pub use scoped::Scoped;

/// Opaque reference to a value living in the engine's memory domain.
///
/// Whoever receives a handle from the engine owns it and must hand it back
/// through [`ScriptEngine::release`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Wrap a raw handle number
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw handle number
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An embedded script engine instance.
///
/// All methods take `&self`; backends keep their handle tables behind
/// interior mutability and must not hold those borrows while a
/// [`CallbackSink`] runs. Every returned [`HandleId`] is owned by the caller.
pub trait ScriptEngine {
    /// Backend name for logs and stats
    fn name(&self) -> &'static str;

    /// Evaluate the verification module and return a handle to its exports
    fn load_module(&self, source: &ModuleSource) -> Result<HandleId>;

    /// Allocate a native buffer holding a copy of `bytes`
    fn create_buffer(&self, bytes: &[u8]) -> Result<HandleId>;

    /// Create an unsigned byte array view over `buffer`
    fn create_byte_array(&self, buffer: HandleId, offset: usize, len: usize) -> Result<HandleId>;

    /// Copy the contents of a byte array back to the host
    fn read_bytes(&self, array: HandleId) -> Result<Vec<u8>>;

    /// Register a host function that forwards its first argument to `sink`
    fn create_callback(&self, sink: Arc<dyn CallbackSink>) -> Result<HandleId>;

    /// Call an exported function of `module`. Returns the call's own return value.
    fn call_function(&self, module: HandleId, name: &str, args: &[HandleId]) -> Result<HandleId>;

    /// Whether the engine has queued work (jobs, messages) left to run
    fn is_running(&self) -> bool;

    /// Run one unit of queued work
    fn handle_message(&self) -> Result<()>;

    /// Fetch a nested object property. `None` when absent or not an object.
    fn get_object(&self, object: HandleId, key: &str) -> Result<Option<HandleId>>;

    /// Fetch a boolean property. `None` when absent or not a boolean.
    fn get_boolean(&self, object: HandleId, key: &str) -> Result<Option<bool>>;

    /// Give a handle back to the engine
    fn release(&self, handle: HandleId);

    /// Number of handles currently held by the host
    fn live_handles(&self) -> usize;

    /// Tear the engine down. Called once, after every handle was released.
    fn shutdown(&self) {}
}

/// Creates engines for runtime handles
pub trait EngineFactory {
    /// The engine type produced
    type Engine: ScriptEngine;

    /// Create a fresh engine configured from `config`
    fn create(&self, config: &BridgeConfig) -> Result<Self::Engine>;
}
