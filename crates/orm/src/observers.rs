use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use crate::event_error::EventError;
use crate::events::{Event, EventKind, ModelObserver};
use crate::model::Model;

struct ObserverList<M: Model> {
    observers: Vec<Arc<dyn ModelObserver<M>>>,
}

/// Observers keyed by model type, owned by one [`crate::Orm`]
#[derive(Default)]
pub struct ObserverRegistry {
    model_observers: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observers run in registration order
    pub fn register<M: Model>(&self, observer: Arc<dyn ModelObserver<M>>) {
        let mut entry = self
            .model_observers
            .entry(TypeId::of::<M>())
            .or_insert_with(|| {
                Box::new(ObserverList::<M> {
                    observers: Vec::new(),
                })
            });

        if let Some(list) = entry.value_mut().downcast_mut::<ObserverList<M>>() {
            list.observers.push(observer);
        }
    }

    pub fn has_observers_for<M: Model>(&self) -> bool {
        M::observer().is_some() || !self.registered::<M>().is_empty()
    }

    fn registered<M: Model>(&self) -> Vec<Arc<dyn ModelObserver<M>>> {
        self.model_observers
            .get(&TypeId::of::<M>())
            .and_then(|entry| {
                entry
                    .value()
                    .downcast_ref::<ObserverList<M>>()
                    .map(|list| list.observers.clone())
            })
            .unwrap_or_default()
    }

    /// Hooks for `M`: the model's own observer when it has one, else the registered ones
    pub(crate) fn hooks_for<M: Model>(&self) -> Hooks<M> {
        let observers = match M::observer() {
            Some(own) => vec![own],
            None => self.registered::<M>(),
        };
        Hooks { observers }
    }
}

/// A snapshot of the observers for one model type
pub(crate) struct Hooks<M: Model> {
    observers: Vec<Arc<dyn ModelObserver<M>>>,
}

impl<M: Model> Hooks<M> {
    pub(crate) fn none() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) async fn fire(&self, kind: EventKind, event: &mut Event<M>) -> Result<(), EventError> {
        event.set_kind(kind);
        for observer in &self.observers {
            match kind {
                EventKind::Retrieved => observer.retrieved(event).await?,
                EventKind::Creating => observer.creating(event).await?,
                EventKind::Created => observer.created(event).await?,
                EventKind::Updating => observer.updating(event).await?,
                EventKind::Updated => observer.updated(event).await?,
                EventKind::Saving => observer.saving(event).await?,
                EventKind::Saved => observer.saved(event).await?,
                EventKind::Deleting => observer.deleting(event).await?,
                EventKind::Deleted => observer.deleted(event).await?,
                EventKind::ForceDeleting => observer.force_deleting(event).await?,
                EventKind::ForceDeleted => observer.force_deleted(event).await?,
            }
        }
        Ok(())
    }
}
