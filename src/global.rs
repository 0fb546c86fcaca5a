//! An optional process-wide `AudioEngine` for applications that only ever
//! need one. `AudioEngine` itself stays an owned value — nothing here
//! forces a singleton on callers who construct and hold their own engine.

use std::sync::{Mutex, OnceLock};

use crate::config::EngineConfig;
use crate::engine::AudioEngine;
use crate::error::{EngineError, Result};

static ENGINE: OnceLock<Mutex<AudioEngine>> = OnceLock::new();

/// Initializes the process-wide engine. Returns an error if it has already
/// been initialized; there is no implicit re-configuration.
pub fn init(config: EngineConfig) -> Result<()> {
    let engine = AudioEngine::new(config)?;
    ENGINE
        .set(Mutex::new(engine))
        .map_err(|_| EngineError::InvalidState("global engine already initialized".into()))
}

/// Runs `f` with exclusive access to the process-wide engine.
pub fn with_engine<T>(f: impl FnOnce(&mut AudioEngine) -> T) -> Result<T> {
    let mutex = ENGINE
        .get()
        .ok_or_else(|| EngineError::InvalidState("global engine not initialized".into()))?;
    let mut engine = mutex.lock().unwrap();
    Ok(f(&mut engine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_engine_before_init_errors() {
        // Uses a config-less check so this test doesn't depend on ordering
        // against other tests that call `init` (OnceLock is process-global).
        // If another test already initialized it, this just exercises the
        // already-initialized branch below instead.
        let result = with_engine(|engine| engine.mixer().source_count());
        if init(EngineConfig::default()).is_ok() {
            assert!(result.is_err());
        }
    }

    #[test]
    fn double_init_is_rejected() {
        let _ = init(EngineConfig::default());
        assert!(init(EngineConfig::default()).is_err());
    }
}
