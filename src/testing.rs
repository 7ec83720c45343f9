//! Leak-detecting engine double.
//!
//! [`RecordingEngine`] implements [`ScriptEngine`] over a host-side handle
//! table. It counts every allocation and release, records the proofs it was
//! asked to verify, and plays back [`ScriptedResponse`]s instead of running a
//! real script. Clones share one ledger, so a test can keep a clone to
//! inspect after the bridge under test has dropped its own.

use crate::callback::CallbackSink;
use crate::config::BridgeConfig;
use crate::engine::{EngineFactory, HandleId, ScriptEngine};
use crate::error::{BridgeError, Result};
use crate::module::ModuleSource;
use crate::value::ScriptValue;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How the scripted `verifyProof` reacts to one call
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Invoke the callback once with this result graph
    Callback(ScriptValue),
    /// Invoke the callback twice in the same cycle
    Repeated(ScriptValue, ScriptValue),
    /// Invoke the callback with no argument
    NoArgument,
    /// Invoke the callback from another thread after the job queue is idle
    Late {
        /// Result graph
        value: ScriptValue,
        /// Delay before the callback fires
        delay: Duration,
    },
    /// Never invoke the callback
    Silent,
}

impl ScriptedResponse {
    /// Callback with a `{ mainProof: { isVerified } }` graph
    pub fn verdict(verified: bool) -> Self {
        ScriptedResponse::Callback(ScriptValue::verification_result(verified))
    }
}

/// Engine operation the double can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Loading the verification module
    ModuleLoad,
    /// Registering a call's callback function
    CallbackRegistration,
}

enum Entry {
    Buffer(Vec<u8>),
    ByteArray(Vec<u8>),
    Module,
    Callback(Arc<dyn CallbackSink>),
    Value(ScriptValue),
}

struct Job {
    ticks_left: u32,
    sink: Arc<dyn CallbackSink>,
    deliveries: Vec<Option<ScriptValue>>,
}

struct Ledger {
    next_id: u64,
    entries: HashMap<u64, Entry>,
    allocated: u64,
    released: u64,
    invalid_releases: u64,
    release_log: Vec<HandleId>,
    engines_created: u64,
    engines_shut_down: u64,
    invocations: u64,
    proofs: Vec<Vec<u8>>,
    modules: Vec<String>,
    responses: VecDeque<ScriptedResponse>,
    jobs: VecDeque<Job>,
    failure: Option<FailurePoint>,
    ticks: u32,
    exported: String,
}

impl Ledger {
    fn allocate(&mut self, entry: Entry) -> HandleId {
        self.next_id += 1;
        self.allocated += 1;
        self.entries.insert(self.next_id, entry);
        HandleId::new(self.next_id)
    }

    fn entry(&self, handle: HandleId) -> Result<&Entry> {
        self.entries
            .get(&handle.raw())
            .ok_or_else(|| BridgeError::engine(format!("unknown handle {}", handle)))
    }

    fn value(&self, handle: HandleId) -> Result<&ScriptValue> {
        match self.entry(handle)? {
            Entry::Value(value) => Ok(value),
            _ => Err(BridgeError::engine(format!("handle {} is not a value", handle))),
        }
    }

    fn release(&mut self, handle: HandleId) {
        if self.entries.remove(&handle.raw()).is_some() {
            self.released += 1;
            self.release_log.push(handle);
        } else {
            self.invalid_releases += 1;
            warn!(handle = %handle, "Release of unknown or already released handle");
        }
    }
}

/// Engine double with a shared allocation ledger
#[derive(Clone)]
pub struct RecordingEngine {
    ledger: Arc<Mutex<Ledger>>,
}

impl RecordingEngine {
    /// Create a double whose `verifyProof` answers `true` unless scripted otherwise
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                next_id: 0,
                entries: HashMap::new(),
                allocated: 0,
                released: 0,
                invalid_releases: 0,
                release_log: Vec::new(),
                engines_created: 0,
                engines_shut_down: 0,
                invocations: 0,
                proofs: Vec::new(),
                modules: Vec::new(),
                responses: VecDeque::new(),
                jobs: VecDeque::new(),
                failure: None,
                ticks: 0,
                exported: crate::config::DEFAULT_FUNCTION_NAME.to_string(),
            })),
        }
    }

    /// Queue a response for the next unanswered call
    pub fn respond(self, response: ScriptedResponse) -> Self {
        self.push_response(response);
        self
    }

    /// Queue a response for the next unanswered call
    pub fn push_response(&self, response: ScriptedResponse) {
        self.ledger.lock().responses.push_back(response);
    }

    /// Fail every attempt at `point`
    pub fn failing_at(self, point: FailurePoint) -> Self {
        self.ledger.lock().failure = Some(point);
        self
    }

    /// Number of message-loop turns before a scripted callback fires
    pub fn with_ticks(self, ticks: u32) -> Self {
        self.ledger.lock().ticks = ticks;
        self
    }

    /// Name of the function the fake module exports
    pub fn exporting(self, name: impl Into<String>) -> Self {
        self.ledger.lock().exported = name.into();
        self
    }

    /// Engines handed out by the factory
    pub fn engines_created(&self) -> u64 {
        self.ledger.lock().engines_created
    }

    /// Engines torn down
    pub fn engines_shut_down(&self) -> u64 {
        self.ledger.lock().engines_shut_down
    }

    /// Calls made to the exported function
    pub fn invocations(&self) -> u64 {
        self.ledger.lock().invocations
    }

    /// Handles ever allocated
    pub fn allocated(&self) -> u64 {
        self.ledger.lock().allocated
    }

    /// Handles released
    pub fn released(&self) -> u64 {
        self.ledger.lock().released
    }

    /// Releases of handles that were unknown or already released
    pub fn invalid_releases(&self) -> u64 {
        self.ledger.lock().invalid_releases
    }

    /// Every released handle, in release order
    pub fn release_log(&self) -> Vec<HandleId> {
        self.ledger.lock().release_log.clone()
    }

    /// Proof bytes received by the exported function, in call order
    pub fn proofs(&self) -> Vec<Vec<u8>> {
        self.ledger.lock().proofs.clone()
    }

    /// Names of the modules loaded
    pub fn modules(&self) -> Vec<String> {
        self.ledger.lock().modules.clone()
    }

    /// Queued callback jobs not yet run
    pub fn pending_jobs(&self) -> usize {
        self.ledger.lock().jobs.len()
    }

    /// Every allocation was released exactly once
    pub fn is_balanced(&self) -> bool {
        let ledger = self.ledger.lock();
        ledger.entries.is_empty()
            && ledger.allocated == ledger.released
            && ledger.invalid_releases == 0
    }

    fn deliver(ledger: &Mutex<Ledger>, sink: &dyn CallbackSink, value: Option<ScriptValue>) {
        let argument = value.map(|v| ledger.lock().allocate(Entry::Value(v)));
        // Ledger must be unlocked while the sink runs.
        if let Some(refused) = sink.deliver(argument) {
            ledger.lock().release(refused);
        }
    }
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for RecordingEngine {
    type Engine = RecordingEngine;

    fn create(&self, _config: &BridgeConfig) -> Result<RecordingEngine> {
        self.ledger.lock().engines_created += 1;
        Ok(self.clone())
    }
}

impl ScriptEngine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn load_module(&self, source: &ModuleSource) -> Result<HandleId> {
        let mut ledger = self.ledger.lock();
        if ledger.failure == Some(FailurePoint::ModuleLoad) {
            return Err(BridgeError::engine(format!(
                "SyntaxError: cannot evaluate {}",
                source.name
            )));
        }
        ledger.modules.push(source.name.clone());
        Ok(ledger.allocate(Entry::Module))
    }

    fn create_buffer(&self, bytes: &[u8]) -> Result<HandleId> {
        Ok(self.ledger.lock().allocate(Entry::Buffer(bytes.to_vec())))
    }

    fn create_byte_array(&self, buffer: HandleId, offset: usize, len: usize) -> Result<HandleId> {
        let mut ledger = self.ledger.lock();
        let bytes = match ledger.entry(buffer)? {
            Entry::Buffer(bytes) => bytes
                .get(offset..offset + len)
                .ok_or_else(|| BridgeError::engine("byte array view out of bounds"))?
                .to_vec(),
            _ => return Err(BridgeError::engine(format!("handle {} is not a buffer", buffer))),
        };
        Ok(ledger.allocate(Entry::ByteArray(bytes)))
    }

    fn read_bytes(&self, array: HandleId) -> Result<Vec<u8>> {
        match self.ledger.lock().entry(array)? {
            Entry::ByteArray(bytes) | Entry::Buffer(bytes) => Ok(bytes.clone()),
            _ => Err(BridgeError::engine(format!("handle {} is not binary", array))),
        }
    }

    fn create_callback(&self, sink: Arc<dyn CallbackSink>) -> Result<HandleId> {
        let mut ledger = self.ledger.lock();
        if ledger.failure == Some(FailurePoint::CallbackRegistration) {
            return Err(BridgeError::engine("cannot register host function"));
        }
        Ok(ledger.allocate(Entry::Callback(sink)))
    }

    fn call_function(&self, module: HandleId, name: &str, args: &[HandleId]) -> Result<HandleId> {
        let mut ledger = self.ledger.lock();
        if !matches!(ledger.entry(module)?, Entry::Module) {
            return Err(BridgeError::engine(format!("handle {} is not a module", module)));
        }
        if name != ledger.exported {
            return Err(BridgeError::engine(format!("TypeError: {} is not a function", name)));
        }

        let (proof, sink) = match args {
            [array, callback] => {
                let proof = match ledger.entry(*array)? {
                    Entry::ByteArray(bytes) => bytes.clone(),
                    _ => return Err(BridgeError::engine("first argument is not a Uint8Array")),
                };
                let sink = match ledger.entry(*callback)? {
                    Entry::Callback(sink) => Arc::clone(sink),
                    _ => return Err(BridgeError::engine("second argument is not a function")),
                };
                (proof, sink)
            }
            _ => {
                return Err(BridgeError::engine(format!(
                    "expected 2 arguments, got {}",
                    args.len()
                )))
            }
        };

        ledger.invocations += 1;
        debug!(proof_len = proof.len(), "Recording engine received proof");
        ledger.proofs.push(proof);

        let response = ledger
            .responses
            .pop_front()
            .unwrap_or_else(|| ScriptedResponse::verdict(true));
        let ticks = ledger.ticks;

        match response {
            ScriptedResponse::Callback(value) => ledger.jobs.push_back(Job {
                ticks_left: ticks,
                sink,
                deliveries: vec![Some(value)],
            }),
            ScriptedResponse::Repeated(first, second) => ledger.jobs.push_back(Job {
                ticks_left: ticks,
                sink,
                deliveries: vec![Some(first), Some(second)],
            }),
            ScriptedResponse::NoArgument => ledger.jobs.push_back(Job {
                ticks_left: ticks,
                sink,
                deliveries: vec![None],
            }),
            ScriptedResponse::Late { value, delay } => {
                let shared = Arc::clone(&self.ledger);
                thread::spawn(move || {
                    thread::sleep(delay);
                    RecordingEngine::deliver(&shared, sink.as_ref(), Some(value));
                });
            }
            ScriptedResponse::Silent => {}
        }

        // `verifyProof` itself returns undefined
        Ok(ledger.allocate(Entry::Value(ScriptValue::Null)))
    }

    fn is_running(&self) -> bool {
        !self.ledger.lock().jobs.is_empty()
    }

    fn handle_message(&self) -> Result<()> {
        let job = {
            let mut ledger = self.ledger.lock();
            match ledger.jobs.pop_front() {
                Some(mut job) if job.ticks_left > 0 => {
                    job.ticks_left -= 1;
                    ledger.jobs.push_back(job);
                    return Ok(());
                }
                Some(job) => job,
                None => return Ok(()),
            }
        };

        for value in job.deliveries {
            Self::deliver(&self.ledger, job.sink.as_ref(), value);
        }
        Ok(())
    }

    fn get_object(&self, object: HandleId, key: &str) -> Result<Option<HandleId>> {
        let mut ledger = self.ledger.lock();
        let nested = ledger.value(object)?.get(key).filter(|v| v.is_object()).cloned();
        Ok(nested.map(|value| ledger.allocate(Entry::Value(value))))
    }

    fn get_boolean(&self, object: HandleId, key: &str) -> Result<Option<bool>> {
        Ok(self
            .ledger
            .lock()
            .value(object)?
            .get(key)
            .and_then(ScriptValue::as_bool))
    }

    fn release(&self, handle: HandleId) {
        self.ledger.lock().release(handle);
    }

    fn live_handles(&self) -> usize {
        self.ledger.lock().entries.len()
    }

    fn shutdown(&self) {
        let mut ledger = self.ledger.lock();
        ledger.engines_shut_down += 1;
        ledger.jobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{CallbackBridge, CallbackSlot, Delivery};

    fn setup(engine: &RecordingEngine) -> (HandleId, HandleId, CallbackSlot) {
        let slot = CallbackSlot::new();
        let (cycle, _) = slot.begin_cycle();
        let module = engine
            .load_module(&ModuleSource::new("fake.js", ""))
            .unwrap();
        let callback = engine
            .create_callback(Arc::new(CallbackBridge::new(slot.clone(), cycle)))
            .unwrap();
        (module, callback, slot)
    }

    #[test]
    fn test_double_release_is_counted() {
        let engine = RecordingEngine::new();
        let handle = engine.create_buffer(&[1]).unwrap();
        engine.release(handle);
        engine.release(handle);
        assert_eq!(engine.invalid_releases(), 1);
        assert!(!engine.is_balanced());
    }

    #[test]
    fn test_ticks_delay_the_callback() {
        let engine = RecordingEngine::new().with_ticks(2);
        let (module, callback, slot) = setup(&engine);
        let buffer = engine.create_buffer(&[5]).unwrap();
        let array = engine.create_byte_array(buffer, 0, 1).unwrap();

        let pending = engine
            .call_function(module, "verifyProof", &[array, callback])
            .unwrap();

        let mut turns = 0;
        while engine.is_running() {
            engine.handle_message().unwrap();
            turns += 1;
        }
        assert_eq!(turns, 3);
        assert!(matches!(slot.take(), Some(Delivery::Result(_))));
        assert_eq!(engine.proofs(), vec![vec![5]]);
        engine.release(pending);
    }

    #[test]
    fn test_unknown_function() {
        let engine = RecordingEngine::new();
        let (module, callback, _slot) = setup(&engine);
        let buffer = engine.create_buffer(&[]).unwrap();
        let array = engine.create_byte_array(buffer, 0, 0).unwrap();

        let err = engine
            .call_function(module, "verify", &[array, callback])
            .unwrap_err();
        assert!(err.to_string().contains("is not a function"));
        assert_eq!(engine.invocations(), 0);
    }

    #[test]
    fn test_get_object_filters_non_objects() {
        let engine = RecordingEngine::new();
        let root = engine.ledger.lock().allocate(Entry::Value(ScriptValue::object([
            ("mainProof", ScriptValue::Bool(true)),
            ("flag", ScriptValue::Bool(false)),
        ])));

        assert_eq!(engine.get_object(root, "mainProof").unwrap(), None);
        assert_eq!(engine.get_boolean(root, "flag").unwrap(), Some(false));
        assert_eq!(engine.get_boolean(root, "absent").unwrap(), None);
        engine.release(root);
        assert!(engine.is_balanced());
    }
}
