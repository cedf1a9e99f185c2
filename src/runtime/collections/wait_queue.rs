// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ::std::{
    marker::PhantomData,
    ptr::NonNull,
    rc::Rc,
};

// An intrusive doubly-linked list (FIFO queue) with owned elements. The
// scheduler uses one instance as the run queue and the synchronization
// objects use one per wait list. Elements carry their own link fields, so
// enqueue, dequeue, and removal from the middle are all O(1) and perform no
// allocation. Removal from the middle is what cancellation and wait timeouts
// are built on.
#[derive(Debug)]
pub struct WaitQueue<T: IntrusivelyLinked> {
    // Pointer to the first element in the queue.
    head: Option<NonNull<T>>,
    // Pointer to the last element in the queue.
    tail: Option<NonNull<T>>,
    // Length of the queue in elements.
    len: usize,
    // Hint to compiler that this struct "owns" an Rc<T> (for safety determinations).
    phantom: PhantomData<Rc<T>>,
}

// Implemented by anything that can sit on a [WaitQueue]. An element may be
// linked into at most one queue at a time; the link fields belong to that
// queue while the element is linked.
pub trait IntrusivelyLinked {
    // Returns the next element in the queue.
    fn get_link_next(&self) -> Option<NonNull<Self>>;

    // Sets the next element in the queue.
    fn set_link_next(&self, element: Option<NonNull<Self>>);

    // Returns the previous element in the queue.
    fn get_link_prev(&self) -> Option<NonNull<Self>>;

    // Sets the previous element in the queue.
    fn set_link_prev(&self, element: Option<NonNull<Self>>);
}

impl<T: IntrusivelyLinked> WaitQueue<T> {
    // Create an empty WaitQueue.
    #[inline]
    pub const fn new() -> Self {
        WaitQueue {
            head: None,
            tail: None,
            len: 0,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    // Add the given element to the back of the queue.
    pub fn push_back(&mut self, added: Rc<T>) {
        // The new element becomes the tail, so it has no successor.
        added.set_link_next(None);
        added.set_link_prev(self.tail);

        // Convert from an Rc<T> to a raw pointer.
        // Note: Rc::into_raw does NOT decrement the reference count (which is the behavior we want).
        let added: NonNull<T> =
            NonNull::new(Rc::into_raw(added) as *mut T).expect("Rc pointers are never null");

        match self.tail {
            // Point the current last element's next pointer at the new element. The doubly-linked
            // layout lets us reach it through the raw pointer without reforming an Rc.
            Some(old_tail) => unsafe { old_tail.as_ref() }.set_link_next(Some(added)),
            // Nothing currently on the queue, so the new element also becomes the front.
            None => self.head = Some(added),
        }

        self.tail = Some(added);
        self.len += 1;
    }

    // Pop the first element off the front of the queue.
    pub fn pop_front(&mut self) -> Option<Rc<T>> {
        let head: NonNull<T> = self.head?;

        // Reclaim the reference the queue was holding for this element.
        let popped: Rc<T> = unsafe { Rc::from_raw(head.as_ptr()) };

        // Repoint the front pointer at the next element (or None).
        self.head = popped.get_link_next();
        match self.head {
            Some(new_head) => unsafe { new_head.as_ref() }.set_link_prev(None),
            // The queue is now empty, so clear the back pointer as well.
            None => self.tail = None,
        }

        // Clear the link fields in the popped element.
        popped.set_link_next(None);
        popped.set_link_prev(None);

        self.len -= 1;
        Some(popped)
    }

    // Unlink the given element from this queue, returning the reference the
    // queue was holding. Returns None when the element is not linked, which
    // makes callers such as cancellation naturally idempotent. The caller
    // must only pass elements that are either unlinked or linked into THIS
    // queue.
    pub fn remove(&mut self, element: &T) -> Option<Rc<T>> {
        let ptr: NonNull<T> = NonNull::from(element);

        // An unlinked element has no neighbors and is not the head.
        if element.get_link_prev().is_none() && element.get_link_next().is_none() && self.head != Some(ptr) {
            return None;
        }

        match element.get_link_prev() {
            Some(prev) => unsafe { prev.as_ref() }.set_link_next(element.get_link_next()),
            None => self.head = element.get_link_next(),
        }
        match element.get_link_next() {
            Some(next) => unsafe { next.as_ref() }.set_link_prev(element.get_link_prev()),
            None => self.tail = element.get_link_prev(),
        }

        element.set_link_next(None);
        element.set_link_prev(None);

        self.len -= 1;
        Some(unsafe { Rc::from_raw(ptr.as_ptr()) })
    }
}

// Drop.
// We need an explicit drop implementation because we hold a Rc reference for each element on the
// list, and since we store the Rcs as raw pointers they won't drop automatically.
impl<T: IntrusivelyLinked> Drop for WaitQueue<T> {
    fn drop(&mut self) {
        // Pop everything off the queue.
        while self.pop_front().is_some() {}
    }
}

// Unit tests for WaitQueue type and IntrusivelyLinked trait.
#[cfg(test)]
mod tests {
    use super::{
        IntrusivelyLinked,
        WaitQueue,
    };
    use ::core::cell::Cell;
    use ::std::{
        ptr::NonNull,
        rc::Rc,
    };

    // A test element.
    // This supports the IntrusivelyLinked trait, so it can be put on a WaitQueue.
    pub struct TestThingy {
        // Support for IntrusivelyLinked trait.
        next: Cell<Option<NonNull<TestThingy>>>,
        prev: Cell<Option<NonNull<TestThingy>>>,

        // Some data value.
        pub data: u32,
    }

    impl TestThingy {
        fn new(value: u32) -> Self {
            TestThingy {
                next: Cell::new(None),
                prev: Cell::new(None),
                data: value,
            }
        }
    }

    // Support for IntrusivelyLinked trait.
    impl IntrusivelyLinked for TestThingy {
        fn get_link_next(&self) -> Option<NonNull<Self>> {
            self.next.get()
        }

        fn set_link_next(&self, element: Option<NonNull<Self>>) {
            self.next.set(element);
        }

        fn get_link_prev(&self) -> Option<NonNull<Self>> {
            self.prev.get()
        }

        fn set_link_prev(&self, element: Option<NonNull<Self>>) {
            self.prev.set(element);
        }
    }

    #[test]
    fn fifo_order() {
        // Create the queue.
        let mut queue: WaitQueue<TestThingy> = WaitQueue::new();

        // Verify: The queue should be empty.
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        // Create some test elements.
        let element1: Rc<TestThingy> = Rc::new(TestThingy::new(1));
        let element2: Rc<TestThingy> = Rc::new(TestThingy::new(2));
        let element3: Rc<TestThingy> = Rc::new(TestThingy::new(3));
        let element4: Rc<TestThingy> = Rc::new(TestThingy::new(4));

        // Push the elements onto the end of the queue.
        queue.push_back(element1);
        queue.push_back(element2);
        queue.push_back(element3);
        queue.push_back(element4);

        // Verify: The queue should now contain 4 elements.
        assert_eq!(queue.is_empty(), false);
        assert_eq!(queue.len(), 4);

        // Pop the elements off of the front of the queue.
        // They should come off in the same order they went on (i.e. FIFO queue).
        let mut check_data: u32 = 0;
        while let Some(popped_element) = queue.pop_front() {
            check_data += 1;

            // Verify the correct element popped.
            assert_eq!(popped_element.data, check_data);

            // Verify refcount on element Rc is 1.
            assert_eq!(Rc::strong_count(&popped_element), 1);

            // Verify length of queue is correct.
            assert_eq!(queue.len(), 4 - check_data as usize);
        }

        // Verify: The queue should be empty.
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn remove_from_middle() {
        let mut queue: WaitQueue<TestThingy> = WaitQueue::new();

        let element1: Rc<TestThingy> = Rc::new(TestThingy::new(1));
        let element2: Rc<TestThingy> = Rc::new(TestThingy::new(2));
        let element3: Rc<TestThingy> = Rc::new(TestThingy::new(3));

        queue.push_back(element1.clone());
        queue.push_back(element2.clone());
        queue.push_back(element3.clone());

        // Unlink the middle element.
        let removed: Option<Rc<TestThingy>> = queue.remove(&element2);
        assert_eq!(removed.expect("element2 should be linked").data, 2);
        assert_eq!(queue.len(), 2);

        // A second removal of the same element is a no-op.
        assert!(queue.remove(&element2).is_none());
        assert_eq!(queue.len(), 2);

        // Verify the queue still pops in order around the hole.
        assert_eq!(queue.pop_front().expect("queue should have 2 elements").data, 1);
        assert_eq!(queue.pop_front().expect("queue should have 1 element").data, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_at_ends() {
        let mut queue: WaitQueue<TestThingy> = WaitQueue::new();

        let element1: Rc<TestThingy> = Rc::new(TestThingy::new(1));
        let element2: Rc<TestThingy> = Rc::new(TestThingy::new(2));
        let element3: Rc<TestThingy> = Rc::new(TestThingy::new(3));

        queue.push_back(element1.clone());
        queue.push_back(element2.clone());
        queue.push_back(element3.clone());

        // Unlink the head and the tail.
        assert!(queue.remove(&element1).is_some());
        assert!(queue.remove(&element3).is_some());
        assert_eq!(queue.len(), 1);

        // The sole survivor is both head and tail.
        assert_eq!(queue.pop_front().expect("queue should have 1 element").data, 2);
        assert!(queue.is_empty());

        // Removing the sole element of a queue works too.
        queue.push_back(element2.clone());
        assert!(queue.remove(&element2).is_some());
        assert!(queue.is_empty());

        // Refcounts are back to: local variable only.
        assert_eq!(Rc::strong_count(&element1), 1);
        assert_eq!(Rc::strong_count(&element2), 1);
        assert_eq!(Rc::strong_count(&element3), 1);
    }

    #[test]
    fn drop_releases_references() {
        // Create some test elements.
        let element5: Rc<TestThingy> = Rc::new(TestThingy::new(5));
        let element6: Rc<TestThingy> = Rc::new(TestThingy::new(6));

        {
            let mut queue: WaitQueue<TestThingy> = WaitQueue::new();
            queue.push_back(element5.clone());
            queue.push_back(element6.clone());

            // The queue holds one reference per linked element.
            assert_eq!(Rc::strong_count(&element5), 2);
            assert_eq!(Rc::strong_count(&element6), 2);

            // Leaving this scope drops the WaitQueue with both elements still on it.
        }

        // Verify that the queue released its references on drop.
        assert_eq!(Rc::strong_count(&element5), 1);
        assert_eq!(Rc::strong_count(&element6), 1);
    }
}
