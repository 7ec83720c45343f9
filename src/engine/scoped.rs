//! Scoped ownership of engine handles.
//!
//! A [`Scoped`] guard releases its handle when dropped, so every exit path
//! of the invoker (success, error, early return) gives handles back.

use super::{HandleId, ScriptEngine};

/// Owns one engine handle until dropped or released
pub struct Scoped<'e, E: ScriptEngine + ?Sized> {
    engine: &'e E,
    handle: HandleId,
    armed: bool,
}

impl<'e, E: ScriptEngine + ?Sized> Scoped<'e, E> {
    /// Take ownership of `handle`
    pub fn new(engine: &'e E, handle: HandleId) -> Self {
        Self {
            engine,
            handle,
            armed: true,
        }
    }

    /// The guarded handle
    pub fn id(&self) -> HandleId {
        self.handle
    }

    /// Release now instead of at end of scope
    pub fn release(self) {
        // Drop does the work
    }

    /// Give up ownership without releasing
    pub fn into_inner(mut self) -> HandleId {
        self.armed = false;
        self.handle
    }
}

impl<E: ScriptEngine + ?Sized> Drop for Scoped<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.engine.release(self.handle);
        }
    }
}
