use super::stream::{
    emit_collection, emit_item, Action, CollectionHandler, ItemHandler, Observable, Stream,
    SubscriptionCounter, SubscriptionId,
};
use super::CollectionError;
use std::fmt;
use std::ops::Index;

/// Ordered container that reports every mutation
///
/// Each mutating call updates storage first, then notifies the item stream,
/// then the collection stream. Single writer: the owner mutates, any number of
/// handlers observe.
pub struct EventCollection<T> {
    items: Vec<T>,
    item_stream: Stream<ItemHandler<T>>,
    collection_stream: Stream<CollectionHandler<T>>,
    ids: SubscriptionCounter,
}

impl<T> EventCollection<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            item_stream: Stream::new(),
            collection_stream: Stream::new(),
            ids: SubscriptionCounter::default(),
        }
    }

    /// Build a collection from existing items without emitting anything
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items,
            ..Self::new()
        }
    }

    /// Append an item
    ///
    /// The item event carries the previous last element (if any) and the new one.
    pub fn push(&mut self, item: T) {
        self.items.push(item);

        let len = self.items.len();
        let previous = len.checked_sub(2).and_then(|i| self.items.get(i));
        emit_item(&mut self.item_stream, Action::Create, previous, self.items.last());
        emit_collection(&mut self.collection_stream, Action::Create, &self.items);
    }

    /// Append several items: one item event per item, then a single collection event
    pub fn extend<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut appended = false;

        for item in items {
            self.items.push(item);
            appended = true;

            let len = self.items.len();
            let previous = len.checked_sub(2).and_then(|i| self.items.get(i));
            emit_item(&mut self.item_stream, Action::Create, previous, self.items.last());
        }

        if appended {
            emit_collection(&mut self.collection_stream, Action::Create, &self.items);
        }
    }

    /// Replace the item at `index`, returning the replaced value
    pub fn set(&mut self, index: usize, item: T) -> Result<T, CollectionError> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(CollectionError::OutOfBounds { index, len })?;
        let previous = std::mem::replace(slot, item);

        emit_item(
            &mut self.item_stream,
            Action::Update,
            Some(&previous),
            self.items.get(index),
        );
        emit_collection(&mut self.collection_stream, Action::Update, &self.items);

        Ok(previous)
    }

    /// Mutate the item at `index` in place and announce it as an update
    ///
    /// The item event has no previous value. Returns None if `index` is out of bounds.
    pub fn modify<R>(&mut self, index: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let result = f(self.items.get_mut(index)?);

        emit_item(&mut self.item_stream, Action::Update, None, self.items.get(index));
        emit_collection(&mut self.collection_stream, Action::Update, &self.items);

        Some(result)
    }

    /// Remove the item at `index`
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }

        let removed = self.items.remove(index);
        emit_item(&mut self.item_stream, Action::Delete, Some(&removed), None);
        emit_collection(&mut self.collection_stream, Action::Delete, &self.items);

        Some(removed)
    }

    /// Remove the first item matching `predicate`
    pub fn remove_where(&mut self, predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let index = self.items.iter().position(predicate)?;
        self.remove(index)
    }

    /// Remove everything, returning the removed items
    pub fn clear(&mut self) -> Vec<T> {
        let removed = std::mem::take(&mut self.items);

        emit_item(&mut self.item_stream, Action::Clear, None, None);
        emit_collection(&mut self.collection_stream, Action::Clear, &self.items);

        removed
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn position(&self, predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(predicate)
    }

    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<&T> {
        self.items.iter().find(|item| predicate(item))
    }

    /// Number of attached handlers across both streams
    pub fn subscriber_count(&self) -> usize {
        self.item_stream.len() + self.collection_stream.len()
    }
}

impl<T> Observable<T> for EventCollection<T> {
    fn subscribe_item<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&super::ItemMessage<'_, T>) + Send + 'static,
    {
        let id = self.ids.next();
        self.item_stream.attach(id, Box::new(handler));
        id
    }

    fn subscribe_collection<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&super::CollectionMessage<'_, T>) + Send + 'static,
    {
        let id = self.ids.next();
        self.collection_stream.attach(id, Box::new(handler));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.item_stream.detach(id) || self.collection_stream.detach(id)
    }
}

impl<T> Default for EventCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for EventCollection<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a EventCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for EventCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCollection")
            .field("items", &self.items)
            .field("item_subscribers", &self.item_stream.len())
            .field("collection_subscribers", &self.collection_stream.len())
            .finish()
    }
}
