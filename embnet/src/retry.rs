//! Wake up senders that were blocked by a lower layer.
//!
//! When a lower layer can not currently accept a packet (the hardware address is still being
//! resolved, the transmit queue is full, the link is down) the sender registers a *request* with
//! a *list* owned by the resource it is waiting for. Once the resource becomes available, the
//! owner dispatches its list and every request registered at that moment is retried once.
//!
//! All of this is stored in caller supplied memory. Requests and lists are addressed by index and
//! linked by index, so that adding and removing a request takes constant time and nothing refers
//! to the senders themselves.
//!
//! ```
//! # use embnet::retry::{ListHead, ListId, Request, RequestId, SendRetry};
//! let mut requests = [Request::default(); 4];
//! let mut lists = [ListHead::default(); 2];
//! let mut retry = SendRetry::new(&mut requests[..], &mut lists[..]);
//!
//! let (list, req) = (ListId::new(1), RequestId::new(3));
//! retry.add_request(list, req);
//! assert!(retry.is_registered(req));
//!
//! retry.dispatch(list);
//! assert!(!retry.is_registered(req));
//! assert_eq!(retry.pop_ready(), Some(req));
//! assert_eq!(retry.pop_ready(), None);
//! ```
use crate::managed::Slice;

/// Index of a request, usually the index of the sender owning it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(usize);

/// Index of a list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListId(usize);

/// The link storage of one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Request {
    owner: Owner,
    prev: Option<usize>,
    next: Option<usize>,
}

/// The head of one list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ListHead {
    first: Option<usize>,
    last: Option<usize>,
}

/// Where a request is currently linked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Owner {
    Detached,
    List(usize),
    Ready,
    Dispatching,
}

/// The registry of all requests and lists.
pub struct SendRetry<'a> {
    requests: Slice<'a, Request>,
    lists: Slice<'a, ListHead>,
    ready: ListHead,
    dispatching: ListHead,
}

impl RequestId {
    /// Refer to the request at an index.
    pub const fn new(index: usize) -> Self {
        RequestId(index)
    }

    /// The index of the request.
    pub fn index(self) -> usize {
        self.0
    }
}

impl ListId {
    /// Refer to the list at an index.
    pub const fn new(index: usize) -> Self {
        ListId(index)
    }

    /// The index of the list.
    pub fn index(self) -> usize {
        self.0
    }
}

impl Default for Owner {
    fn default() -> Self {
        Owner::Detached
    }
}

impl<'a> SendRetry<'a> {
    /// Create a registry in which every request is detached and every list empty.
    pub fn new<R, L>(requests: R, lists: L) -> Self
        where R: Into<Slice<'a, Request>>, L: Into<Slice<'a, ListHead>>,
    {
        let mut requests = requests.into();
        let mut lists = lists.into();
        requests.iter_mut().for_each(|req| *req = Request::default());
        lists.iter_mut().for_each(|list| *list = ListHead::default());
        SendRetry {
            requests,
            lists,
            ready: ListHead::default(),
            dispatching: ListHead::default(),
        }
    }

    /// The number of requests.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// The number of lists.
    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// Register a request with a list, at its end.
    ///
    /// A request is a member of at most one list. If it was already registered somewhere, or was
    /// dispatched and not yet handled, it is moved.
    pub fn add_request(&mut self, list: ListId, req: RequestId) {
        assert!(list.0 < self.lists.len(), "list index out of bounds");
        self.unlink(req.0);
        self.push_back(Owner::List(list.0), req.0);
    }

    /// Detach a request from wherever it is linked.
    pub fn remove_request(&mut self, req: RequestId) {
        self.unlink(req.0);
    }

    /// Detach all requests of a list without retrying them.
    pub fn reset_list(&mut self, list: ListId) {
        let mut next = self.lists[list.0].first;
        while let Some(idx) = next {
            debug_assert_eq!(self.requests[idx].owner, Owner::List(list.0));
            next = self.requests[idx].next;
            self.requests[idx] = Request::default();
        }
        self.lists[list.0] = ListHead::default();
    }

    /// Check if the request is waiting in some list.
    pub fn is_registered(&self, req: RequestId) -> bool {
        match self.requests[req.0].owner {
            Owner::List(_) => true,
            _ => false,
        }
    }

    /// Check if the request was dispatched and has not been popped yet.
    pub fn is_ready(&self, req: RequestId) -> bool {
        self.requests[req.0].owner == Owner::Ready
    }

    /// Check if no request is registered with the list.
    pub fn is_empty(&self, list: ListId) -> bool {
        self.lists[list.0].first.is_none()
    }

    /// Check if there is any dispatched request left.
    pub fn has_ready(&self) -> bool {
        self.ready.first.is_some()
    }

    /// Move all requests of the list to the ready queue, in registration order.
    ///
    /// The list is empty afterwards. Requests registered again while they are handled are only
    /// found by a later dispatch of their list.
    pub fn dispatch(&mut self, list: ListId) {
        while let Some(idx) = self.lists[list.0].first {
            self.unlink(idx);
            self.push_back(Owner::Ready, idx);
        }
    }

    /// Take the next dispatched request.
    pub fn pop_ready(&mut self) -> Option<RequestId> {
        let idx = self.ready.first?;
        self.unlink(idx);
        Some(RequestId(idx))
    }

    /// Dispatch a list, calling a closure for each of its requests.
    ///
    /// Works on a snapshot of the list. Each request is detached before the closure is called for
    /// it. The closure may add requests back or remove other requests, a request added back is not
    /// visited again during this call.
    pub fn dispatch_with<F>(&mut self, list: ListId, mut f: F)
        where F: FnMut(&mut Self, RequestId),
    {
        debug_assert!(self.dispatching.first.is_none(), "nested dispatch");
        while let Some(idx) = self.lists[list.0].first {
            self.unlink(idx);
            self.push_back(Owner::Dispatching, idx);
        }

        while let Some(idx) = self.dispatching.first {
            self.unlink(idx);
            f(self, RequestId(idx));
        }
    }

    fn head_mut(&mut self, owner: Owner) -> Option<&mut ListHead> {
        match owner {
            Owner::Detached => None,
            Owner::List(list) => Some(&mut self.lists[list]),
            Owner::Ready => Some(&mut self.ready),
            Owner::Dispatching => Some(&mut self.dispatching),
        }
    }

    fn push_back(&mut self, owner: Owner, idx: usize) {
        debug_assert_eq!(self.requests[idx].owner, Owner::Detached);
        let head = match self.head_mut(owner) {
            Some(head) => head,
            None => return,
        };

        let prev = head.last;
        head.last = Some(idx);
        if head.first.is_none() {
            head.first = Some(idx);
        }

        if let Some(prev) = prev {
            self.requests[prev].next = Some(idx);
        }

        self.requests[idx] = Request {
            owner,
            prev,
            next: None,
        };
    }

    fn unlink(&mut self, idx: usize) {
        let Request { owner, prev, next } = self.requests[idx];
        let head = match self.head_mut(owner) {
            Some(head) => head,
            None => return,
        };

        if head.first == Some(idx) {
            head.first = next;
        }
        if head.last == Some(idx) {
            head.last = prev;
        }

        if let Some(prev) = prev {
            self.requests[prev].next = next;
        }
        if let Some(next) = next {
            self.requests[next].prev = prev;
        }

        self.requests[idx] = Request::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn registry() -> SendRetry<'static> {
        SendRetry::new(vec![Request::default(); 8], vec![ListHead::default(); 3])
    }

    fn drain(retry: &mut SendRetry) -> Vec<usize> {
        let mut order = Vec::new();
        while let Some(req) = retry.pop_ready() {
            order.push(req.index());
        }
        order
    }

    #[test]
    fn dispatch_in_registration_order() {
        let mut retry = registry();
        let list = ListId::new(0);
        for &idx in &[4, 1, 7, 2] {
            retry.add_request(list, RequestId::new(idx));
        }
        assert!(!retry.is_empty(list));

        retry.dispatch(list);
        assert!(retry.is_empty(list));
        assert!(retry.is_ready(RequestId::new(7)));
        assert_eq!(drain(&mut retry), vec![4, 1, 7, 2]);
        assert!(!retry.has_ready());

        // Nothing is registered anymore.
        retry.dispatch(list);
        assert_eq!(drain(&mut retry), Vec::<usize>::new());
    }

    #[test]
    fn single_membership() {
        let mut retry = registry();
        let (first, second) = (ListId::new(1), ListId::new(2));
        let req = RequestId::new(5);

        retry.add_request(first, req);
        retry.add_request(second, req);
        assert!(retry.is_empty(first));
        assert!(!retry.is_empty(second));

        // Adding again moves the request to the end.
        retry.add_request(second, RequestId::new(0));
        retry.add_request(second, req);
        retry.dispatch(second);
        assert_eq!(drain(&mut retry), vec![0, 5]);

        retry.dispatch(first);
        assert_eq!(drain(&mut retry), Vec::<usize>::new());
    }

    #[test]
    fn remove_and_reset() {
        let mut retry = registry();
        let list = ListId::new(0);
        for idx in 0..5 {
            retry.add_request(list, RequestId::new(idx));
        }

        retry.remove_request(RequestId::new(0));
        retry.remove_request(RequestId::new(2));
        retry.remove_request(RequestId::new(4));
        // Removing a detached request is fine.
        retry.remove_request(RequestId::new(4));
        assert!(!retry.is_registered(RequestId::new(2)));
        assert!(retry.is_registered(RequestId::new(3)));

        retry.reset_list(list);
        assert!(retry.is_empty(list));
        assert!(!retry.is_registered(RequestId::new(1)));
        assert!(!retry.is_registered(RequestId::new(3)));

        // The list is still usable.
        retry.add_request(list, RequestId::new(3));
        retry.dispatch(list);
        assert_eq!(drain(&mut retry), vec![3]);
    }

    #[test]
    fn readd_while_handling_waits_for_next_dispatch() {
        let mut retry = registry();
        let list = ListId::new(0);
        retry.add_request(list, RequestId::new(1));
        retry.add_request(list, RequestId::new(2));
        retry.dispatch(list);

        let mut handled = Vec::new();
        while let Some(req) = retry.pop_ready() {
            handled.push(req.index());
            // Still blocked, register again.
            retry.add_request(list, req);
        }
        assert_eq!(handled, vec![1, 2]);
        assert!(retry.is_registered(RequestId::new(1)));

        retry.dispatch(list);
        assert_eq!(drain(&mut retry), vec![1, 2]);
    }

    #[test]
    fn removing_ready_request() {
        let mut retry = registry();
        let list = ListId::new(0);
        retry.add_request(list, RequestId::new(1));
        retry.add_request(list, RequestId::new(2));
        retry.dispatch(list);
        retry.remove_request(RequestId::new(1));
        assert_eq!(drain(&mut retry), vec![2]);
    }

    #[test]
    fn dispatch_with_snapshot() {
        let mut retry = registry();
        let list = ListId::new(0);
        for idx in 0..4 {
            retry.add_request(list, RequestId::new(idx));
        }

        let mut calls = Vec::new();
        retry.dispatch_with(list, |retry, req| {
            calls.push(req.index());
            assert!(!retry.is_registered(req));
            // Re-registers itself, must not be visited twice.
            retry.add_request(list, req);
            // Drops a later member of the snapshot.
            if req.index() == 0 {
                retry.remove_request(RequestId::new(2));
            }
        });
        assert_eq!(calls, vec![0, 1, 3]);

        calls.clear();
        retry.dispatch_with(list, |_, req| calls.push(req.index()));
        assert_eq!(calls, vec![0, 1, 3]);
        assert!(retry.is_empty(list));
    }

    #[test]
    fn borrowed_storage() {
        let mut requests = [Request::default(); 2];
        let mut lists = [ListHead::default(); 1];
        let mut retry = SendRetry::new(&mut requests[..], &mut lists[..]);
        assert_eq!(retry.request_count(), 2);
        assert_eq!(retry.list_count(), 1);
        retry.add_request(ListId::new(0), RequestId::new(1));
        retry.dispatch(ListId::new(0));
        assert_eq!(retry.pop_ready(), Some(RequestId::new(1)));
    }
}
