//! Typed event bus.
//!
//! Each event type is its own topic with its own queue. Producers push during a
//! frame; the host drains the topics it cares about afterwards. The bus is owned
//! by whoever produces into it, so dropping the owner drops every pending
//! event and there are no subscriptions to leak.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event onto its topic.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        let q = q.downcast_mut::<Vec<E>>().expect("queue type mismatch");
        q.push(e);
    }

    /// Drains all queued events of a topic, oldest first.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }

    /// Borrows the pending events of a topic without consuming them.
    pub fn peek<E: 'static + Send + Sync>(&self) -> &[E] {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<Vec<E>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drops every pending event on every topic.
    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Spawned(u32);

    #[derive(Debug, PartialEq)]
    struct Faded;

    #[test]
    fn topics_are_independent() {
        let mut bus = EventBus::default();
        bus.push(Spawned(1));
        bus.push(Faded);
        bus.push(Spawned(2));

        assert_eq!(bus.peek::<Spawned>().len(), 2);
        assert_eq!(bus.drain::<Spawned>(), vec![Spawned(1), Spawned(2)]);
        assert!(bus.drain::<Spawned>().is_empty());
        assert_eq!(bus.drain::<Faded>(), vec![Faded]);
    }
}
