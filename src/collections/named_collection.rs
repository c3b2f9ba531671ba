use super::stream::{
    emit_collection, emit_item, Action, CollectionHandler, CollectionMessage, ItemHandler,
    ItemMessage, Observable, Stream, SubscriptionCounter, SubscriptionId,
};
use std::collections::HashMap;
use std::fmt;

/// Anything that can be stored under its own name
pub trait Named {
    fn name(&self) -> &str;
}

/// Name-keyed variant of [`super::EventCollection`]
///
/// Keeps insertion order, so index-based iteration is stable and matches the
/// order items were first inserted.
pub struct NamedCollection<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
    item_stream: Stream<ItemHandler<T>>,
    collection_stream: Stream<CollectionHandler<T>>,
    ids: SubscriptionCounter,
}

impl<T: Named> NamedCollection<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            item_stream: Stream::new(),
            collection_stream: Stream::new(),
            ids: SubscriptionCounter::default(),
        }
    }

    /// Insert or replace by name
    ///
    /// A new name is a Create carrying the previous last element. An existing
    /// name is an Update carrying the replaced value, which is also returned.
    pub fn insert(&mut self, item: T) -> Option<T> {
        match self.index.get(item.name()).copied() {
            Some(position) => {
                let previous = std::mem::replace(&mut self.items[position], item);

                emit_item(
                    &mut self.item_stream,
                    Action::Update,
                    Some(&previous),
                    self.items.get(position),
                );
                emit_collection(&mut self.collection_stream, Action::Update, &self.items);

                Some(previous)
            }
            None => {
                self.index.insert(item.name().to_string(), self.items.len());
                self.items.push(item);

                let len = self.items.len();
                let previous = len.checked_sub(2).and_then(|i| self.items.get(i));
                emit_item(&mut self.item_stream, Action::Create, previous, self.items.last());
                emit_collection(&mut self.collection_stream, Action::Create, &self.items);

                None
            }
        }
    }

    /// Remove by name
    pub fn remove(&mut self, name: &str) -> Option<T> {
        let position = self.index.remove(name)?;
        let removed = self.items.remove(position);

        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }

        emit_item(&mut self.item_stream, Action::Delete, Some(&removed), None);
        emit_collection(&mut self.collection_stream, Action::Delete, &self.items);

        Some(removed)
    }

    /// Mutate an entry in place and announce it as an update
    pub fn modify<R>(&mut self, name: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let position = *self.index.get(name)?;
        let result = f(&mut self.items[position]);

        emit_item(&mut self.item_stream, Action::Update, None, self.items.get(position));
        emit_collection(&mut self.collection_stream, Action::Update, &self.items);

        Some(result)
    }

    pub fn clear(&mut self) -> Vec<T> {
        self.index.clear();
        let removed = std::mem::take(&mut self.items);

        emit_item(&mut self.item_stream, Action::Clear, None, None);
        emit_collection(&mut self.collection_stream, Action::Clear, &self.items);

        removed
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&position| &self.items[position])
    }

    /// Mutable access that bypasses notification
    ///
    /// For owners updating nested state that reports through its own streams.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        let position = *self.index.get(name)?;
        self.items.get_mut(position)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.name())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Observable<T> for NamedCollection<T> {
    fn subscribe_item<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&ItemMessage<'_, T>) + Send + 'static,
    {
        let id = self.ids.next();
        self.item_stream.attach(id, Box::new(handler));
        id
    }

    fn subscribe_collection<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&CollectionMessage<'_, T>) + Send + 'static,
    {
        let id = self.ids.next();
        self.collection_stream.attach(id, Box::new(handler));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.item_stream.detach(id) || self.collection_stream.detach(id)
    }
}

impl<T: Named> Default for NamedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Named> FromIterator<T> for NamedCollection<T> {
    /// Collects without emitting, later duplicates replace earlier ones
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut collection = Self::new();
        for item in iter {
            match collection.index.get(item.name()).copied() {
                Some(position) => collection.items[position] = item,
                None => {
                    collection
                        .index
                        .insert(item.name().to_string(), collection.items.len());
                    collection.items.push(item);
                }
            }
        }
        collection
    }
}

impl<T: fmt::Debug> fmt::Debug for NamedCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedCollection")
            .field("items", &self.items)
            .field("item_subscribers", &self.item_stream.len())
            .field("collection_subscribers", &self.collection_stream.len())
            .finish()
    }
}
