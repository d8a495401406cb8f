use std::sync::{PoisonError, RwLock};

use crate::ConfigError;

/// Settings that can check their own invariants.
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

type Listener<T> = Box<dyn Fn(&T, &T) + Send + Sync>;

/// Typed settings holder that notifies listeners on every accepted change.
///
/// Listeners are fixed when the store is built and are called synchronously,
/// on the writer's thread, with `(previous, current)` after the new value has
/// been validated and installed. Rejected updates leave the stored value and
/// listeners untouched.
pub struct PreferenceStore<T> {
    current: RwLock<T>,
    listeners: Vec<Listener<T>>,
}

pub struct PreferenceStoreBuilder<T> {
    listeners: Vec<Listener<T>>,
}

impl<T> PreferenceStoreBuilder<T>
where
    T: Validate + Clone + PartialEq,
{
    pub fn listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn build(self, initial: T) -> Result<PreferenceStore<T>, ConfigError> {
        initial.validate()?;
        Ok(PreferenceStore {
            current: RwLock::new(initial),
            listeners: self.listeners,
        })
    }
}

impl<T> PreferenceStore<T>
where
    T: Validate + Clone + PartialEq,
{
    pub fn builder() -> PreferenceStoreBuilder<T> {
        PreferenceStoreBuilder {
            listeners: Vec::new(),
        }
    }

    pub fn new(initial: T) -> Result<Self, ConfigError> {
        Self::builder().build(initial)
    }

    /// Copy of the current value; later writes do not affect it.
    pub fn snapshot(&self) -> T {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `change` to a copy of the current value and installs it if valid.
    pub fn update<F>(&self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut T),
    {
        let mut next = self.snapshot();
        change(&mut next);
        self.replace(next)
    }

    pub fn replace(&self, next: T) -> Result<(), ConfigError> {
        next.validate()?;
        let previous = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if *guard == next {
                return Ok(());
            }
            std::mem::replace(&mut *guard, next.clone())
        };
        for listener in &self.listeners {
            listener(&previous, &next);
        }
        Ok(())
    }
}
