//! The lazily-evaluated, typed object store inside every event.
//!
//! Grounded on `JEvent::Get`/`Insert` (`examples/original_source/src/lib/JANA/JEvent.h`):
//! a `FactorySet` maps `(type, tag)` to a `Factory`, computing its output
//! collection on first access and caching it for the rest of the event's
//! lifetime (unless the factory demands `REGENERATE`).

use std::any::{Any, TypeId};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::error::{CoreError, Result};
use crate::level::Level;

/// User-supplied computation producing the typed collection for one
/// `(T, tag)` key. Analogous to the original's `Factory::Process`.
pub trait FactoryCallback<T>: Send + Sync {
    fn process(&self, event: &super::Event) -> Result<Vec<T>>;
}

impl<T, F> FactoryCallback<T> for F
where
    F: Fn(&super::Event) -> Result<Vec<T>> + Send + Sync,
{
    fn process(&self, event: &super::Event) -> Result<Vec<T>> {
        (self)(event)
    }
}

/// Behavior flags a factory may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FactoryFlags {
    /// State survives event reset instead of being cleared.
    pub persistent: bool,
    /// Released objects are not owned by the factory (no-op on reset beyond
    /// clearing the collection).
    pub not_object_owner: bool,
    /// Re-run `process` on every access rather than caching.
    pub regenerate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FactoryStatus {
    NotCreatedYet,
    Created,
    Inserted,
    InsertedByExternal,
    NeverCreated,
}

struct FactorySlot<T> {
    flags: FactoryFlags,
    status: FactoryStatus,
    objects: Arc<Vec<T>>,
    callback: Option<Arc<dyn FactoryCallback<T>>>,
    last_run_observed: Option<i64>,
}

impl<T> FactorySlot<T> {
    fn empty(flags: FactoryFlags, callback: Option<Arc<dyn FactoryCallback<T>>>) -> Self {
        FactorySlot {
            flags,
            status: FactoryStatus::NotCreatedYet,
            objects: Arc::new(Vec::new()),
            callback,
            last_run_observed: None,
        }
    }

    fn reset(&mut self) {
        if self.flags.persistent {
            return;
        }
        self.objects = Arc::new(Vec::new());
        self.status = FactoryStatus::NotCreatedYet;
    }
}

type FactoryKey = (TypeId, String);

fn key_of<T: 'static>(tag: &str) -> FactoryKey {
    (TypeId::of::<T>(), tag.to_string())
}

/// Type-erased handle onto a `FactorySlot<T>`, letting `FactorySet` hold
/// heterogeneous slots in one map while still being able to reset every
/// slot without knowing its `T`.
trait ErasedFactorySlot: Send + Sync {
    fn reset_slot(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static + Send + Sync> ErasedFactorySlot for FactorySlot<T> {
    fn reset_slot(&mut self) {
        self.reset();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An owned collection of factories keyed by `(logical type identity, tag
/// string)`. The level of a `FactorySet` equals the level of its owning
/// event.
pub struct FactorySet {
    level: Level,
    slots: Mutex<HashMap<FactoryKey, Box<dyn ErasedFactorySlot>>>,
    in_progress: Mutex<HashSet<FactoryKey>>,
    default_tags: Mutex<HashMap<TypeId, String>>,
}

impl FactorySet {
    pub fn new(level: Level) -> Self {
        FactorySet {
            level,
            slots: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
            default_tags: Mutex::new(HashMap::new()),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Registers a factory computation for `(T, tag)`. A later call with the
    /// same key replaces the callback (the last registration wins), matching
    /// how the original rebinds a factory on re-registration.
    pub fn register<T: 'static + Send + Sync>(
        &self,
        tag: impl Into<String>,
        flags: FactoryFlags,
        callback: Arc<dyn FactoryCallback<T>>,
    ) {
        let key = key_of::<T>(&tag.into());
        let mut slots = self.slots.lock();
        slots.insert(key, Box::new(FactorySlot::empty(flags, Some(callback))));
    }

    /// Sets the tag that an empty-tag lookup for `T` is rewritten to,
    /// enabling A/B substitution of algorithms without touching call sites.
    pub fn set_default_tag<T: 'static>(&self, tag: impl Into<String>) {
        self.default_tags.lock().insert(TypeId::of::<T>(), tag.into());
    }

    fn resolve_tag<T: 'static>(&self, tag: &str) -> String {
        if !tag.is_empty() {
            return tag.to_string();
        }
        self.default_tags
            .lock()
            .get(&TypeId::of::<T>())
            .cloned()
            .unwrap_or_default()
    }

    /// Adds objects directly to the factory's collection and marks it
    /// `Inserted` so `process` never runs for this event.
    pub fn insert<T: 'static + Send + Sync>(&self, tag: impl Into<String>, objects: Vec<T>) {
        let key = key_of::<T>(&tag.into());
        let mut slots = self.slots.lock();
        let entry = slots
            .entry(key)
            .or_insert_with(|| Box::new(FactorySlot::<T>::empty(FactoryFlags::default(), None)));
        if let Some(slot) = entry.as_any_mut().downcast_mut::<FactorySlot<T>>() {
            slot.objects = Arc::new(objects);
            slot.status = FactoryStatus::InsertedByExternal;
        }
    }

    /// Get-or-compute: returns the cached collection for `(T, tag)`,
    /// synchronously invoking the registered factory's `process` on first
    /// access (or every access, if `REGENERATE` is set).
    pub fn get_or_compute<T: 'static + Send + Sync>(
        &self,
        event: &super::Event,
        tag: &str,
    ) -> Result<Arc<Vec<T>>> {
        let type_name = std::any::type_name::<T>();
        let tag = self.resolve_tag::<T>(tag);
        let key = key_of::<T>(&tag);

        {
            let slots = self.slots.lock();
            let boxed = slots.get(&key).ok_or_else(|| CoreError::FactoryMissing {
                type_name,
                tag: tag.clone(),
            })?;
            let slot = boxed
                .as_any()
                .downcast_ref::<FactorySlot<T>>()
                .ok_or_else(|| CoreError::FactoryTypeMismatch {
                    type_name,
                    tag: tag.clone(),
                })?;
            let needs_compute = slot.flags.regenerate
                || matches!(slot.status, FactoryStatus::NotCreatedYet | FactoryStatus::NeverCreated);
            if !needs_compute {
                return Ok(slot.objects.clone());
            }
        }

        {
            let mut in_progress = self.in_progress.lock();
            if !in_progress.insert(key.clone()) {
                return Err(CoreError::CycleDetected { type_name, tag });
            }
        }

        let callback = {
            let slots = self.slots.lock();
            let boxed = slots.get(&key).expect("checked above");
            boxed
                .as_any()
                .downcast_ref::<FactorySlot<T>>()
                .expect("checked above")
                .callback
                .clone()
        };

        let result = match callback {
            Some(cb) => cb.process(event),
            None => Err(CoreError::LifecycleViolation(format!(
                "factory `{type_name}` tag `{tag}` has no callback and was never inserted"
            ))),
        };

        self.in_progress.lock().remove(&key);
        let objects = Arc::new(result?);

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&key).and_then(|b| b.as_any_mut().downcast_mut::<FactorySlot<T>>()) {
            slot.objects = objects.clone();
            slot.status = FactoryStatus::Created;
        }
        Ok(objects)
    }

    /// Get-single: the lone object for `(T, tag)`, or `None` if the
    /// collection is empty.
    pub fn get_single<T: 'static + Send + Sync>(
        &self,
        event: &super::Event,
        tag: &str,
    ) -> Result<Option<Arc<Vec<T>>>> {
        let objs = self.get_or_compute::<T>(event, tag)?;
        if objs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(objs))
        }
    }

    /// Get-single-strict: errors unless the collection has exactly one object.
    pub fn get_single_strict<T: 'static + Send + Sync>(
        &self,
        event: &super::Event,
        tag: &str,
    ) -> Result<Arc<Vec<T>>> {
        let type_name = std::any::type_name::<T>();
        let resolved_tag = self.resolve_tag::<T>(tag);
        let objs = self.get_or_compute::<T>(event, tag)?;
        if objs.len() != 1 {
            return Err(CoreError::SingleObjectExpected {
                type_name,
                tag: resolved_tag,
                found: objs.len(),
            });
        }
        Ok(objs)
    }

    /// Whether a run-change was observed for `(T, tag)` since the last call,
    /// updating the stored run as a side effect. Drives the `EndRun`/`BeginRun`
    /// hook dispatch a processor performs around `process`.
    pub fn observe_run_change<T: 'static>(&self, tag: &str, run_number: i64) -> bool {
        let key = key_of::<T>(tag);
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&key).and_then(|b| b.as_any_mut().downcast_mut::<FactorySlot<T>>()) {
            let changed = slot.last_run_observed != Some(run_number);
            slot.last_run_observed = Some(run_number);
            changed
        } else {
            true
        }
    }

    /// Clears every non-persistent factory's cached state. Called when the
    /// owning event is reset and returned to its pool.
    pub fn reset(&self) {
        let mut slots = self.slots.lock();
        for boxed in slots.values_mut() {
            boxed.reset_slot();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[test]
    fn get_or_compute_runs_once() {
        let fs = FactorySet::new(Level::Event);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        fs.register::<i32>(
            "",
            FactoryFlags::default(),
            Arc::new(move |_: &Event| {
                calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![1, 2, 3])
            }),
        );
        let event = Event::new_detached(1, 1, Level::Event, 0);
        let a = fs.get_or_compute::<i32>(&event, "").unwrap();
        let b = fs.get_or_compute::<i32>(&event, "").unwrap();
        assert_eq!(*a, vec![1, 2, 3]);
        assert_eq!(*b, vec![1, 2, 3]);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_factory_errors() {
        let fs = FactorySet::new(Level::Event);
        let event = Event::new_detached(1, 1, Level::Event, 0);
        let err = fs.get_or_compute::<i32>(&event, "missing").unwrap_err();
        assert!(matches!(err, CoreError::FactoryMissing { .. }));
    }

    #[test]
    fn insert_prevents_process() {
        let fs = FactorySet::new(Level::Event);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        fs.register::<i32>(
            "",
            FactoryFlags::default(),
            Arc::new(move |_: &Event| {
                calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![99])
            }),
        );
        fs.insert::<i32>("", vec![7]);
        let event = Event::new_detached(1, 1, Level::Event, 0);
        let objs = fs.get_or_compute::<i32>(&event, "").unwrap();
        assert_eq!(*objs, vec![7]);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn cyclic_factory_dependency_detected() {
        let event = Event::new_detached(1, 1, Level::Event, 0);
        event.register_factory::<i32>(
            "",
            FactoryFlags::default(),
            Arc::new(|e: &Event| {
                e.get::<f64>("")?;
                Ok(vec![1])
            }),
        );
        event.register_factory::<f64>(
            "",
            FactoryFlags::default(),
            Arc::new(|e: &Event| {
                e.get::<i32>("")?;
                Ok(vec![1.0])
            }),
        );
        let err = event.get::<i32>("").unwrap_err();
        assert!(matches!(err, CoreError::CycleDetected { .. }));
    }

    #[test]
    fn regenerate_runs_every_access() {
        let fs = FactorySet::new(Level::Event);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        fs.register::<i32>(
            "",
            FactoryFlags { regenerate: true, ..Default::default() },
            Arc::new(move |_: &Event| {
                let n = calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![n as i32])
            }),
        );
        let event = Event::new_detached(1, 1, Level::Event, 0);
        let a = fs.get_or_compute::<i32>(&event, "").unwrap();
        let b = fs.get_or_compute::<i32>(&event, "").unwrap();
        assert_ne!(*a, *b);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
