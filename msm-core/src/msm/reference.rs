//! Process-wide cache of one [`RuntimeArena`] per curve.
//!
//! The registry keeps only a weak reference, so the arena lives exactly as
//! long as some [`PippengerReference`] does. Acquiring a handle while one is
//! live reuses (and if needed grows) the same arena.
//!
//! Acquisition is meant for one logical computation at a time. Two
//! concurrent top-level computations serialize on the arena's mutex instead
//! of sharing it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ark_ec::short_weierstrass::SWCurveConfig;
use lazy_static::lazy_static;

use crate::msm::runtime_state::{ArenaLayout, RuntimeArena};
use crate::utils::errors::MsmError;

type SharedArena<P> = Arc<Mutex<RuntimeArena<P>>>;

lazy_static! {
    /// `TypeId` of the curve config to a `Weak<Mutex<RuntimeArena<P>>>`.
    static ref ARENA_REGISTRY: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>> =
        Mutex::new(HashMap::new());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic inside an MSM leaves the arena's buffers in an unspecified but
    // valid state; every invocation rewrites what it reads.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn live_arena<P: SWCurveConfig>(
    registry: &HashMap<TypeId, Box<dyn Any + Send + Sync>>,
) -> Option<SharedArena<P>> {
    registry
        .get(&TypeId::of::<P>())
        .and_then(|entry| entry.downcast_ref::<Weak<Mutex<RuntimeArena<P>>>>())
        .and_then(Weak::upgrade)
}

/// A strong handle on the cached arena for curve `P`.
pub struct PippengerReference<P: SWCurveConfig> {
    arena: SharedArena<P>,
}

impl<P: SWCurveConfig> PippengerReference<P> {
    /// Returns a handle on an arena covering `required`: the live one, grown
    /// if it is too small, or a fresh one with headroom.
    pub fn acquire(required: &ArenaLayout) -> Result<Self, MsmError> {
        let mut registry = lock(&ARENA_REGISTRY);
        let arena = match live_arena::<P>(&registry) {
            Some(arena) => {
                if lock(&arena).reserve(required)? {
                    tracing::debug!(layout = ?required, "grew cached arena");
                } else {
                    tracing::trace!("reusing cached arena");
                }
                arena
            }
            None => {
                let arena = Arc::new(Mutex::new(RuntimeArena::new(required.with_headroom())?));
                registry.insert(TypeId::of::<P>(), Box::new(Arc::downgrade(&arena)));
                tracing::debug!(layout = ?required, "created cached arena");
                arena
            }
        };
        Ok(Self { arena })
    }

    /// Locks the arena. Calling [`crate::msm::multiply_and_sum`] (or anything
    /// else that acquires the cached arena for `P`) while the guard is held
    /// deadlocks; drop the guard first.
    pub fn get(&self) -> MutexGuard<'_, RuntimeArena<P>> {
        lock(&self.arena)
    }

    /// Drops this handle. The arena is freed if it was the last one.
    pub fn release(self) {}

    /// Whether an arena for `P` is currently held by any handle.
    pub fn is_live() -> bool {
        live_arena::<P>(&lock(&ARENA_REGISTRY)).is_some()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena)
    }
}

impl<P: SWCurveConfig> Clone for PippengerReference<P> {
    fn clone(&self) -> Self {
        Self {
            arena: Arc::clone(&self.arena),
        }
    }
}
