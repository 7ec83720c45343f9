//! Conversion between host byte slices and engine byte arrays.

use crate::engine::{HandleId, Scoped, ScriptEngine};
use crate::error::Result;

/// An engine `Uint8Array` holding a copy of a host proof.
///
/// Owns both the array view and its backing buffer. Dropping it releases the
/// view first and the buffer second.
pub struct NativeBinaryArray<'e, E: ScriptEngine + ?Sized> {
    // Field order is release order.
    array: Scoped<'e, E>,
    buffer: Scoped<'e, E>,
    len: usize,
}

impl<'e, E: ScriptEngine + ?Sized> NativeBinaryArray<'e, E> {
    /// Handle of the array view, to pass as a call argument
    pub fn handle(&self) -> HandleId {
        self.array.id()
    }

    /// Handle of the backing buffer
    pub fn buffer(&self) -> HandleId {
        self.buffer.id()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Copy `bytes` into a fresh engine byte array
pub fn to_native<'e, E: ScriptEngine + ?Sized>(
    engine: &'e E,
    bytes: &[u8],
) -> Result<NativeBinaryArray<'e, E>> {
    let buffer = Scoped::new(engine, engine.create_buffer(bytes)?);
    let array = Scoped::new(engine, engine.create_byte_array(buffer.id(), 0, bytes.len())?);

    Ok(NativeBinaryArray {
        array,
        buffer,
        len: bytes.len(),
    })
}

/// Copy an engine byte array back to the host
pub fn from_native<E: ScriptEngine + ?Sized>(engine: &E, array: HandleId) -> Result<Vec<u8>> {
    engine.read_bytes(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingEngine;

    #[test]
    fn test_copy_is_exact() {
        let engine = RecordingEngine::new();
        let proof = [0xde, 0xad, 0xbe, 0xef, 0x00];

        let native = to_native(&engine, &proof).unwrap();
        assert_eq!(native.len(), proof.len());
        assert_eq!(from_native(&engine, native.handle()).unwrap(), proof.to_vec());
    }

    #[test]
    fn test_empty_proof() {
        let engine = RecordingEngine::new();
        let native = to_native(&engine, &[]).unwrap();
        assert!(native.is_empty());
        assert!(from_native(&engine, native.handle()).unwrap().is_empty());
    }

    #[test]
    fn test_drop_releases_view_then_buffer() {
        let engine = RecordingEngine::new();
        let (array, buffer) = {
            let native = to_native(&engine, &[1, 2, 3]).unwrap();
            assert_eq!(engine.live_handles(), 2);
            (native.handle(), native.buffer())
        };

        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.release_log(), vec![array, buffer]);
    }
}
