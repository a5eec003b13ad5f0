//! Bounded event channels.
//!
//! One ring buffer per event type, FIFO up to capacity, oldest-overwritten
//! on overflow. Channel operations go through a mutex so publish and consume
//! work from `&self`; in the single-threaded core the lock is uncontended.

use std::any::{Any, TypeId};

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use crate::error::{EcsError, Result};

/// Default channel capacity when created through `World::events`.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Marker trait for event payloads. Events are plain values.
pub trait Event: Send + Sync + Clone + 'static {}

impl<T: Send + Sync + Clone + 'static> Event for T {}

/// Channel occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub count: usize,
    pub capacity: usize,
    pub is_empty: bool,
    pub is_full: bool,
    pub utilization: f32,
}

struct Ring<T> {
    buffer: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);
        Self {
            buffer,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: T) {
        let capacity = self.buffer.len();
        self.buffer[self.tail] = Some(value);
        self.tail = (self.tail + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        } else {
            // Overflowed: the slot just written was the oldest event.
            self.head = (self.head + 1) % capacity;
        }
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let value = self.buffer[self.head].take();
        self.head = (self.head + 1) % self.buffer.len();
        self.count -= 1;
        value
    }

    fn clear(&mut self) {
        for slot in &mut self.buffer {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

/// Bounded FIFO event channel.
pub struct EventChannel<T: Event> {
    inner: Mutex<Ring<T>>,
    capacity: usize,
}

impl<T: Event> EventChannel<T> {
    /// Channel with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY).unwrap()
    }

    /// Channel with an explicit capacity. Fails with `CapacityExceeded`
    /// for capacity 0.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EcsError::CapacityExceeded);
        }
        Ok(Self {
            inner: Mutex::new(Ring::new(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish an event. O(1); on a full channel the oldest event is
    /// silently overwritten. Overflow is not an error.
    pub fn publish(&self, event: T) {
        self.inner.lock().push(event);
    }

    /// Drain the channel FIFO, invoking `f` once per event.
    ///
    /// Events are moved out under the lock and delivered after it is
    /// released, so callbacks may publish into this channel.
    pub fn consume_all<F: FnMut(T)>(&self, mut f: F) {
        let drained: Vec<T> = {
            let mut ring = self.inner.lock();
            std::iter::from_fn(|| ring.pop()).collect()
        };
        for event in drained {
            f(event);
        }
    }

    /// Remove and return the oldest event.
    pub fn try_consume(&self) -> Option<T> {
        self.inner.lock().pop()
    }

    /// Clone the oldest event without removing it.
    pub fn try_peek(&self) -> Option<T> {
        let ring = self.inner.lock();
        if ring.count == 0 {
            return None;
        }
        ring.buffer[ring.head].clone()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Non-consuming FIFO snapshot. Allocates.
    pub fn to_vec(&self) -> Vec<T> {
        let ring = self.inner.lock();
        let capacity = ring.buffer.len();
        (0..ring.count)
            .filter_map(|i| ring.buffer[(ring.head + i) % capacity].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ChannelStats {
        let count = self.len();
        ChannelStats {
            count,
            capacity: self.capacity,
            is_empty: count == 0,
            is_full: count == self.capacity,
            utilization: count as f32 / self.capacity as f32,
        }
    }
}

impl<T: Event> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased channel surface for the hub's frame-boundary sweep.
trait AnyChannel: Send + Sync {
    fn clear_events(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Event> AnyChannel for EventChannel<T> {
    fn clear_events(&self) {
        self.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-world registry of event channels and the one-frame set.
pub(crate) struct EventHub {
    channels: AHashMap<TypeId, Box<dyn AnyChannel>>,
    one_frame: AHashSet<TypeId>,
    default_capacity: usize,
}

impl EventHub {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            channels: AHashMap::new(),
            one_frame: AHashSet::new(),
            default_capacity,
        }
    }

    /// Channel for `T`, created with the default capacity on first access.
    pub fn channel<T: Event>(&mut self) -> &EventChannel<T> {
        let default_capacity = self.default_capacity;
        let channel = self
            .channels
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                tracing::debug!(
                    event_type = std::any::type_name::<T>(),
                    capacity = default_capacity,
                    "creating event channel"
                );
                Box::new(
                    EventChannel::<T>::with_capacity(default_capacity)
                        .expect("default channel capacity must be non-zero"),
                )
            });
        channel.as_any().downcast_ref().unwrap()
    }

    /// Channel for `T` with an explicit capacity, created on first access.
    /// An already existing channel is returned unchanged.
    pub fn channel_with_capacity<T: Event>(&mut self, capacity: usize) -> Result<&EventChannel<T>> {
        use std::collections::hash_map::Entry;
        match self.channels.entry(TypeId::of::<T>()) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_any().downcast_ref().unwrap()),
            Entry::Vacant(entry) => {
                let channel = Box::new(EventChannel::<T>::with_capacity(capacity)?);
                Ok(entry.insert(channel).as_any().downcast_ref().unwrap())
            }
        }
    }

    /// Channel for `T` if it has been created.
    pub fn try_channel<T: Event>(&self) -> Option<&EventChannel<T>> {
        self.channels
            .get(&TypeId::of::<T>())
            .map(|c| c.as_any().downcast_ref().unwrap())
    }

    /// Flag `T` so its channel is cleared at every frame boundary.
    pub fn mark_one_frame<T: Event>(&mut self) {
        self.one_frame.insert(TypeId::of::<T>());
    }

    pub fn is_one_frame<T: Event>(&self) -> bool {
        self.one_frame.contains(&TypeId::of::<T>())
    }

    /// Frame boundary: clear every one-frame channel.
    pub fn clear_one_frame(&mut self) {
        for type_id in &self.one_frame {
            if let Some(channel) = self.channels.get(type_id) {
                channel.clear_events();
            }
        }
    }
}
