use serde::{Deserialize, Serialize};

/// Kind of change carried by a collection notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    Delete,
    Clear,
}

/// Per-item notification
///
/// `previous` and `next` borrow from the collection (or from the value that was
/// just taken out of it) for the duration of the handler call.
#[derive(Debug)]
pub struct ItemMessage<'a, T> {
    pub action: Action,
    pub previous: Option<&'a T>,
    pub next: Option<&'a T>,
}

/// Whole-collection notification with a view of the current contents
#[derive(Debug)]
pub struct CollectionMessage<'a, T> {
    pub action: Action,
    pub items: &'a [T],
}

/// Handle returned by a subscription, used to detach the handler later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type ItemHandler<T> = Box<dyn FnMut(&ItemMessage<'_, T>) + Send>;
pub type CollectionHandler<T> = Box<dyn FnMut(&CollectionMessage<'_, T>) + Send>;

/// Ordered list of handlers attached to one stream
///
/// Handlers are called synchronously in subscription order. An event sent to
/// a stream without handlers is dropped.
pub struct Stream<H> {
    handlers: Vec<(SubscriptionId, H)>,
}

impl<H> Stream<H> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Attach a handler under an id allocated by the owning collection
    pub fn attach(&mut self, id: SubscriptionId, handler: H) {
        self.handlers.push((id, handler));
    }

    /// Detach a handler, returns false if the id is unknown to this stream
    pub fn detach(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(existing, _)| *existing != id);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn handlers_mut(&mut self) -> impl Iterator<Item = &mut H> {
        self.handlers.iter_mut().map(|(_, handler)| handler)
    }
}

impl<H> Default for Stream<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocates subscription ids shared by the two streams of one collection
#[derive(Debug, Default)]
pub(crate) struct SubscriptionCounter(u64);

impl SubscriptionCounter {
    pub(crate) fn next(&mut self) -> SubscriptionId {
        self.0 += 1;
        SubscriptionId(self.0)
    }
}

pub(crate) fn emit_item<T>(
    stream: &mut Stream<ItemHandler<T>>,
    action: Action,
    previous: Option<&T>,
    next: Option<&T>,
) {
    let message = ItemMessage {
        action,
        previous,
        next,
    };
    for handler in stream.handlers_mut() {
        handler(&message);
    }
}

pub(crate) fn emit_collection<T>(stream: &mut Stream<CollectionHandler<T>>, action: Action, items: &[T]) {
    let message = CollectionMessage { action, items };
    for handler in stream.handlers_mut() {
        handler(&message);
    }
}

/// Item and collection subscriptions for anything that owns an event stream pair
pub trait Observable<T> {
    /// Subscribe to per-item changes
    fn subscribe_item<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&ItemMessage<'_, T>) + Send + 'static;

    /// Subscribe to whole-collection changes
    fn subscribe_collection<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&CollectionMessage<'_, T>) + Send + 'static;

    /// Remove a handler from whichever stream holds it
    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_unknown_id() {
        let mut counter = SubscriptionCounter::default();
        let mut stream: Stream<Box<dyn FnMut() + Send>> = Stream::new();

        let id = counter.next();
        stream.attach(id, Box::new(|| {}));

        assert_eq!(stream.len(), 1);
        assert!(!stream.detach(counter.next()));
        assert!(stream.detach(id));
        assert!(stream.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut counter = SubscriptionCounter::default();
        let a = counter.next();
        let b = counter.next();
        assert_ne!(a, b);
    }
}
