//! Thread-safe observable property
//!
//! Values are written from the owning serial queue and read or observed from
//! anywhere. Callback observers run synchronously on the writing thread;
//! async code can [`Observable::subscribe`] to a `tokio::sync::watch` channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

/// Handle returned by [`Observable::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Observable<T> {
    value: watch::Sender<T>,
    observers: Mutex<Vec<(ObserverId, Observer<T>)>>,
    next_id: AtomicU64,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        let (value, _) = watch::channel(value);
        Self {
            value,
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Store a new value and notify observers
    pub fn set(&self, value: T) {
        self.value.send_replace(value.clone());

        let observers: Vec<Observer<T>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(&value);
        }
    }

    /// Call `observer` with every value set from now on
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Async view of the property
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Like [`Observable::observe`], skipping values equal to the previous one
    pub fn observe_unique<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let last = Mutex::new(Some(self.get()));
        self.observe(move |value| {
            let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_ref() != Some(value) {
                *last = Some(value.clone());
                drop(last);
                observer(value);
            }
        })
    }

    /// Set only when the value differs; returns whether it changed
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.value.borrow() == value {
            return false;
        }
        self.set(value);
        true
    }
}

impl<T> std::fmt::Debug for Observable<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.value.borrow())
            .finish()
    }
}
