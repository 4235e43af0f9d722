//! The `EndpointGroup` collaborator: an observable producer of endpoint
//! lists.
//!
//! `WatchedEndpointGroup`/`EndpointPublisher` is a minimal concrete
//! implementation good enough to drive the selector from any discovery
//! mechanism an embedder already has (a polling resolver, a long-poll
//! client, a static list for tests) — they only need to call
//! `EndpointPublisher::publish`. It is the same split the repository uses
//! for its own `resolver::Resolver`/`resolver::Executor` pair: one side is
//! a handle a consumer reads from, the other is a handle a producer writes
//! into, joined by shared interior-mutable state rather than a channel,
//! since everything here runs on one thread.

use futures::{Async, Future, Poll};
use futures::unsync::oneshot;
use ordermap::OrderMap;
use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use endpoint::Endpoint;

pub type ListenerId = u64;

/// An observable producer of endpoint lists.
pub trait EndpointGroup {
    /// The most recently published list, or empty if nothing has been
    /// published yet.
    fn current_endpoints(&self) -> Vec<Endpoint>;

    /// `true` once at least one (possibly empty) list has been published.
    fn is_ready(&self) -> bool;

    /// A one-shot signal that resolves the first time a list is published.
    /// Resolves immediately if the group is already ready.
    fn when_ready(&self) -> WhenReady;

    /// Registers a listener invoked with the new list on every publish.
    /// Invoked synchronously from `EndpointPublisher::publish`, which
    /// callers are expected to drive from the executor (see
    /// `selector::RampingUpSelector`, which registers its own listener and
    /// funnels the callback through `RampExecutor::execute`).
    fn add_listener(&self, listener: Box<FnMut(&[Endpoint])>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    /// Idempotent lifecycle terminator; clears all listeners.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// The future returned by `EndpointGroup::when_ready`.
pub enum WhenReady {
    Ready,
    Pending(oneshot::Receiver<()>),
}

impl Future for WhenReady {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        match *self {
            WhenReady::Ready => Ok(Async::Ready(())),
            WhenReady::Pending(ref mut rx) => rx.poll().map_err(|_| ()),
        }
    }
}

struct Inner {
    endpoints: Vec<Endpoint>,
    ready: bool,
    closed: bool,
    next_id: ListenerId,
    listeners: OrderMap<ListenerId, Rc<RefCell<Box<FnMut(&[Endpoint])>>>>,
    ready_waiters: Vec<oneshot::Sender<()>>,
}

/// Creates a connected `(WatchedEndpointGroup, EndpointPublisher)` pair.
pub fn new() -> (WatchedEndpointGroup, EndpointPublisher) {
    let inner = Rc::new(RefCell::new(Inner {
        endpoints: Vec::new(),
        ready: false,
        closed: false,
        next_id: 0,
        listeners: OrderMap::new(),
        ready_waiters: Vec::new(),
    }));
    (
        WatchedEndpointGroup { inner: inner.clone() },
        EndpointPublisher { inner },
    )
}

#[derive(Clone)]
pub struct WatchedEndpointGroup {
    inner: Rc<RefCell<Inner>>,
}

impl EndpointGroup for WatchedEndpointGroup {
    fn current_endpoints(&self) -> Vec<Endpoint> {
        self.inner.borrow().endpoints.clone()
    }

    fn is_ready(&self) -> bool {
        self.inner.borrow().ready
    }

    fn when_ready(&self) -> WhenReady {
        let mut inner = self.inner.borrow_mut();
        if inner.ready {
            return WhenReady::Ready;
        }
        let (tx, rx) = oneshot::channel();
        inner.ready_waiters.push(tx);
        WhenReady::Pending(rx)
    }

    fn add_listener(&self, listener: Box<FnMut(&[Endpoint])>) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Rc::new(RefCell::new(listener)));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.borrow_mut().listeners.remove(&id);
    }

    fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.closed = true;
        inner.listeners = OrderMap::new();
        inner.ready_waiters.clear();
    }

    fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }
}

/// The producer side of a `WatchedEndpointGroup`.
#[derive(Clone)]
pub struct EndpointPublisher {
    inner: Rc<RefCell<Inner>>,
}

impl EndpointPublisher {
    /// Publishes a new list, invoking every registered listener in
    /// registration order. A no-op if the group has been closed.
    pub fn publish(&self, endpoints: Vec<Endpoint>) {
        let listeners: Vec<Rc<RefCell<Box<FnMut(&[Endpoint])>>>> = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.endpoints = endpoints;
            let was_ready = inner.ready;
            inner.ready = true;
            if !was_ready {
                for waiter in inner.ready_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
            inner.listeners.values().cloned().collect()
        };
        let snapshot = self.inner.borrow().endpoints.clone();
        for listener in &listeners {
            let mut l = listener.borrow_mut();
            (&mut *l)(&snapshot);
        }
    }

    /// Convenience for producers that want to report an upstream failure
    /// without changing the live set: republishes the last known list,
    /// keeping the last known live view in place.
    pub fn republish_unchanged(&self) {
        let current = mem::replace(&mut self.inner.borrow_mut().endpoints, Vec::new());
        self.publish(current);
    }

    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.closed = true;
        inner.listeners = OrderMap::new();
        inner.ready_waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use endpoint::Endpoint;
    use std::cell::Cell;

    #[test]
    fn not_ready_until_first_publish() {
        let (group, _pub) = new();
        assert!(!group.is_ready());
        assert!(group.current_endpoints().is_empty());
    }

    #[test]
    fn listener_receives_published_list() {
        let (group, publisher) = new();
        let seen = Rc::new(RefCell::new(0usize));
        let seen2 = seen.clone();
        group.add_listener(Box::new(move |list| {
            *seen2.borrow_mut() = list.len();
        }));
        publisher.publish(vec![Endpoint::new("a.com", 1), Endpoint::new("b.com", 1)]);
        assert_eq!(*seen.borrow(), 2);
        assert!(group.is_ready());
    }

    #[test]
    fn close_clears_listeners_and_stops_delivery() {
        let (group, publisher) = new();
        let called = Rc::new(Cell::new(false));
        let called2 = called.clone();
        group.add_listener(Box::new(move |_| called2.set(true)));
        group.close();
        publisher.publish(vec![Endpoint::new("a.com", 1)]);
        assert!(!called.get());
        assert!(group.is_closed());
    }

    #[test]
    fn when_ready_resolves_on_first_publish() {
        let (group, publisher) = new();
        let mut fut = group.when_ready();
        assert_eq!(fut.poll(), Ok(Async::NotReady));
        publisher.publish(vec![Endpoint::new("a.com", 1)]);
        assert_eq!(fut.poll(), Ok(Async::Ready(())));
    }

    #[test]
    fn when_ready_resolves_immediately_if_already_ready() {
        let (group, publisher) = new();
        publisher.publish(vec![Endpoint::new("a.com", 1)]);
        let mut fut = group.when_ready();
        assert_eq!(fut.poll(), Ok(Async::Ready(())));
    }
}
