//! QuickJS backend.
//!
//! Runs verification modules written in CommonJS style (`module.exports`)
//! inside an embedded QuickJS runtime. Host-held values are kept as
//! [`Persistent`] entries in a handle table so they survive between
//! context entries; releasing a handle drops its entry.

use super::{EngineFactory, HandleId, ScriptEngine};
use crate::callback::CallbackSink;
use crate::config::{BridgeConfig, ConfigError};
use crate::error::{BridgeError, Result};
use crate::module::ModuleSource;
use rquickjs::function::{Constructor, Rest};
use rquickjs::{
    ArrayBuffer, Context, Ctx, Function, IntoJs, Object, Persistent, Runtime, TypedArray, Value,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Creates [`QuickJsEngine`] instances
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsFactory;

impl EngineFactory for QuickJsFactory {
    type Engine = QuickJsEngine;

    fn create(&self, config: &BridgeConfig) -> Result<QuickJsEngine> {
        QuickJsEngine::new(config)
    }
}

/// Handle table shared with host callbacks running inside the engine
#[derive(Clone, Default)]
struct HandleTable {
    values: Rc<RefCell<HashMap<u64, Persistent<Value<'static>>>>>,
    next_id: Rc<Cell<u64>>,
}

impl HandleTable {
    fn insert<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> HandleId {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.values
            .borrow_mut()
            .insert(id, Persistent::save(ctx, value));
        HandleId::new(id)
    }

    fn restore<'js>(&self, ctx: &Ctx<'js>, handle: HandleId) -> Result<Value<'js>> {
        let persistent = self
            .values
            .borrow()
            .get(&handle.raw())
            .cloned()
            .ok_or_else(|| BridgeError::engine(format!("unknown handle {}", handle)))?;
        persistent
            .restore(ctx)
            .map_err(|e| BridgeError::engine(e.to_string()))
    }

    fn remove(&self, handle: HandleId) -> bool {
        self.values.borrow_mut().remove(&handle.raw()).is_some()
    }

    fn len(&self) -> usize {
        self.values.borrow().len()
    }

    fn clear(&self) {
        let drained: Vec<_> = self.values.borrow_mut().drain().collect();
        drop(drained);
    }
}

/// QuickJS engine instance
pub struct QuickJsEngine {
    // Dropped first: every persistent value must go before the runtime.
    handles: HandleTable,
    context: Context,
    runtime: Runtime,
}

impl QuickJsEngine {
    /// Create a runtime and a full context with the configured limits
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let memory_limit = native_limit("memory_limit_bytes", config.memory_limit_bytes)?;
        let stack_size = native_limit("stack_size_bytes", config.stack_size_bytes)?;

        let runtime = Runtime::new().map_err(|e| BridgeError::initialization(e.to_string()))?;
        runtime.set_memory_limit(memory_limit);
        runtime.set_max_stack_size(stack_size);
        let context =
            Context::full(&runtime).map_err(|e| BridgeError::initialization(e.to_string()))?;

        debug!(
            memory_limit = config.memory_limit_bytes,
            stack_size = config.stack_size_bytes,
            "QuickJS engine created"
        );

        Ok(Self {
            handles: HandleTable::default(),
            context,
            runtime,
        })
    }
}

/// Convert a configured byte limit to the platform's `usize`
fn native_limit(field: &str, bytes: u64) -> std::result::Result<usize, ConfigError> {
    usize::try_from(bytes).map_err(|_| ConfigError::InvalidValue {
        field: field.into(),
        reason: format!("{} does not fit in usize on this target", bytes),
    })
}

/// Map an engine error, pulling the pending exception message when there is one
fn js_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> BridgeError {
    if let rquickjs::Error::Exception = err {
        let caught = ctx.catch();
        if let Some(message) = caught.as_exception().and_then(|e| e.message()) {
            return BridgeError::engine(message);
        }
        return BridgeError::engine(format!("uncaught exception: {:?}", caught));
    }
    BridgeError::engine(err.to_string())
}

fn callback_function<'js>(
    ctx: &Ctx<'js>,
    handles: HandleTable,
    sink: Arc<dyn CallbackSink>,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let delivered = args
                .0
                .into_iter()
                .next()
                .filter(|value| !value.is_undefined() && !value.is_null())
                .map(|value| handles.insert(&ctx, value));

            if let Some(refused) = sink.deliver(delivered) {
                handles.remove(refused);
            }
            Ok(())
        },
    )
}

impl ScriptEngine for QuickJsEngine {
    fn name(&self) -> &'static str {
        "quickjs"
    }

    fn load_module(&self, source: &ModuleSource) -> Result<HandleId> {
        let wrapped = format!(
            "(function (module, exports) {{\n{}\n;return module.exports;\n}})",
            source.code
        );

        self.context.with(|ctx| {
            let factory: Function = ctx.eval(wrapped).map_err(|e| js_error(&ctx, e))?;
            let module = Object::new(ctx.clone()).map_err(|e| js_error(&ctx, e))?;
            let exports = Object::new(ctx.clone()).map_err(|e| js_error(&ctx, e))?;
            module
                .set("exports", exports.clone())
                .map_err(|e| js_error(&ctx, e))?;

            let loaded: Value = factory
                .call((module, exports))
                .map_err(|e| js_error(&ctx, e))?;
            if !loaded.is_object() {
                return Err(BridgeError::engine(format!(
                    "module '{}' exports no object",
                    source.name
                )));
            }
            Ok(self.handles.insert(&ctx, loaded))
        })
    }

    fn create_buffer(&self, bytes: &[u8]) -> Result<HandleId> {
        self.context.with(|ctx| {
            let buffer = ArrayBuffer::new(ctx.clone(), bytes.to_vec())
                .and_then(|buffer| buffer.into_js(&ctx))
                .map_err(|e| js_error(&ctx, e))?;
            Ok(self.handles.insert(&ctx, buffer))
        })
    }

    fn create_byte_array(&self, buffer: HandleId, offset: usize, len: usize) -> Result<HandleId> {
        self.context.with(|ctx| {
            let offset = u32::try_from(offset)
                .map_err(|_| BridgeError::engine("byte array offset exceeds u32"))?;
            let len = u32::try_from(len)
                .map_err(|_| BridgeError::engine("byte array length exceeds u32"))?;
            let buffer = self.handles.restore(&ctx, buffer)?;
            let constructor: Constructor = ctx
                .globals()
                .get("Uint8Array")
                .map_err(|e| js_error(&ctx, e))?;
            let array: Value = constructor
                .construct((buffer, offset, len))
                .map_err(|e| js_error(&ctx, e))?;
            Ok(self.handles.insert(&ctx, array))
        })
    }

    fn read_bytes(&self, array: HandleId) -> Result<Vec<u8>> {
        self.context.with(|ctx| {
            let value = self.handles.restore(&ctx, array)?;
            let array: TypedArray<u8> = value.get().map_err(|e| js_error(&ctx, e))?;
            array
                .as_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| BridgeError::engine("byte array is detached"))
        })
    }

    fn create_callback(&self, sink: Arc<dyn CallbackSink>) -> Result<HandleId> {
        self.context.with(|ctx| {
            let function = callback_function(&ctx, self.handles.clone(), sink)
                .and_then(|function| function.into_js(&ctx))
                .map_err(|e| js_error(&ctx, e))?;
            Ok(self.handles.insert(&ctx, function))
        })
    }

    fn call_function(&self, module: HandleId, name: &str, args: &[HandleId]) -> Result<HandleId> {
        self.context.with(|ctx| {
            let exports = self
                .handles
                .restore(&ctx, module)?
                .into_object()
                .ok_or_else(|| BridgeError::engine("module exports are not an object"))?;
            let function: Function = exports
                .get(name)
                .map_err(|_| BridgeError::engine(format!("module exports no function '{}'", name)))?;

            let args = args
                .iter()
                .map(|handle| self.handles.restore(&ctx, *handle))
                .collect::<Result<Vec<_>>>()?;

            // The table is not borrowed here; the callback may run synchronously.
            let returned: Value = function
                .call((Rest(args),))
                .map_err(|e| js_error(&ctx, e))?;
            Ok(self.handles.insert(&ctx, returned))
        })
    }

    fn is_running(&self) -> bool {
        self.runtime.is_job_pending()
    }

    fn handle_message(&self) -> Result<()> {
        self.runtime
            .execute_pending_job()
            .map(|_| ())
            .map_err(|_| BridgeError::engine("pending job raised an exception"))
    }

    fn get_object(&self, object: HandleId, key: &str) -> Result<Option<HandleId>> {
        self.context.with(|ctx| {
            let value = self.handles.restore(&ctx, object)?;
            let Some(object) = value.as_object() else {
                return Ok(None);
            };
            let property: Value = object.get(key).map_err(|e| js_error(&ctx, e))?;
            if property.is_object() {
                Ok(Some(self.handles.insert(&ctx, property)))
            } else {
                Ok(None)
            }
        })
    }

    fn get_boolean(&self, object: HandleId, key: &str) -> Result<Option<bool>> {
        self.context.with(|ctx| {
            let value = self.handles.restore(&ctx, object)?;
            let Some(object) = value.as_object() else {
                return Ok(None);
            };
            let property: Value = object.get(key).map_err(|e| js_error(&ctx, e))?;
            Ok(property.as_bool())
        })
    }

    fn release(&self, handle: HandleId) {
        if !self.handles.remove(handle) {
            warn!(handle = %handle, "Release of unknown QuickJS handle");
        }
    }

    fn live_handles(&self) -> usize {
        self.handles.len()
    }

    fn shutdown(&self) {
        let live = self.handles.len();
        if live > 0 {
            warn!(live, "QuickJS engine shut down with live handles");
        }
        self.handles.clear();
        self.runtime.run_gc();
        debug!("QuickJS engine shut down");
    }
}

impl Drop for QuickJsEngine {
    fn drop(&mut self) {
        self.handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ProofVerificationTool;
    use crate::error::ErrorCode;
    use crate::marshal;
    use crate::module::ModuleLocator;

    const VERIFIER: &str = r#"
        module.exports.verifyProof = function (proof, callback) {
            Promise.resolve().then(function () {
                var ok = proof.length === 3 && proof[0] === 1;
                callback({ mainProof: { isVerified: ok } });
            });
        };
    "#;

    fn engine() -> QuickJsEngine {
        QuickJsFactory.create(&BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_bytes_round_trip_through_engine() {
        let engine = engine();
        {
            let native = marshal::to_native(&engine, &[5, 6, 7]).unwrap();
            assert_eq!(marshal::from_native(&engine, native.handle()).unwrap(), vec![5, 6, 7]);
            assert_eq!(engine.live_handles(), 2);
        }
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_module_must_export_object() {
        let engine = engine();
        let err = engine
            .load_module(&ModuleSource::new("bad.js", "module.exports = 42;"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::EngineError);
    }

    #[test]
    fn test_throwing_module() {
        let engine = engine();
        let err = engine
            .load_module(&ModuleSource::new("bad.js", "throw new Error('boom');"))
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_verifies_through_promise_job() {
        let locator = ModuleLocator::inline("pvtBundle.js", VERIFIER);
        let mut tool =
            ProofVerificationTool::new(QuickJsFactory, locator, BridgeConfig::default()).unwrap();

        assert!(tool.verify_proof(&[1, 2, 3]).unwrap());
        assert!(!tool.verify_proof(&[9]).unwrap());
        tool.close();
    }

    #[test]
    fn test_missing_main_proof() {
        let source = r#"
            module.exports.verifyProof = function (proof, callback) {
                callback({ other: true });
            };
        "#;
        let locator = ModuleLocator::inline("pvtBundle.js", source);
        let mut tool =
            ProofVerificationTool::new(QuickJsFactory, locator, BridgeConfig::default()).unwrap();

        let err = tool.verify_proof(&[1]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Verification);
    }

    #[test]
    fn test_native_limit() {
        assert_eq!(native_limit("memory_limit_bytes", 64 * 1024 * 1024).unwrap(), 64 * 1024 * 1024);
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_native_limit_rejects_oversized() {
        let err = QuickJsEngine::new(&BridgeConfig::default().with_memory_limit(u64::MAX))
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::Configuration);
    }

    #[test]
    fn test_script_spinning_jobs_times_out() {
        let source = r#"
            module.exports.verifyProof = function () {
                (function spin() { Promise.resolve().then(spin); })();
            };
        "#;
        let locator = ModuleLocator::inline("pvtBundle.js", source);
        let config = BridgeConfig::default().with_callback_timeout(50);
        let mut tool = ProofVerificationTool::new(QuickJsFactory, locator, config).unwrap();

        let err = tool.verify_proof(&[1]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        tool.close();
    }

    #[test]
    fn test_empty_proof() {
        let source = r#"
            module.exports.verifyProof = function (proof, callback) {
                callback({ mainProof: { isVerified: proof.length === 0 } });
            };
        "#;
        let locator = ModuleLocator::inline("pvtBundle.js", source);
        let mut tool =
            ProofVerificationTool::new(QuickJsFactory, locator, BridgeConfig::default()).unwrap();

        assert!(tool.verify_proof(&[]).unwrap());
    }

    #[test]
    fn test_silent_script_times_out() {
        let source = "module.exports.verifyProof = function () {};";
        let locator = ModuleLocator::inline("pvtBundle.js", source);
        let config = BridgeConfig::default().with_callback_timeout(30);
        let mut tool = ProofVerificationTool::new(QuickJsFactory, locator, config).unwrap();

        let err = tool.verify_proof(&[1]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
    }
}
