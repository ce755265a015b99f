//! Iterator plumbing shared by the memtable, tables, and levels.
//!
//! Every internal data source exposes the same seekable, bidirectional
//! cursor over internal keys. Composition happens twice: a two-level
//! iterator walks an index and lazily opens the referenced sub-iterator,
//! and a merging iterator interleaves N children in internal-key order
//! with support for switching direction mid-scan.

use std::cmp::Ordering;

use crate::error::Result;
use crate::keys::compare_internal_keys;

/// A seekable cursor over internal keys.
///
/// `key`/`value` may only be called while `valid()` holds. Errors are
/// deferred: a cursor that hits one becomes invalid and reports it from
/// `status()`.
pub trait InternalIterator {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    /// Positions at the first entry with key >= `target` (an internal key).
    fn seek(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()>;
}

/// An iterator over nothing, used where a source turns out to be empty.
pub struct EmptyIterator {
    status: Result<()>,
}

impl EmptyIterator {
    pub fn new() -> Self {
        EmptyIterator { status: Ok(()) }
    }

    pub fn with_error(err: crate::error::Error) -> Self {
        EmptyIterator { status: Err(err) }
    }
}

impl Default for EmptyIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl InternalIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        unreachable!("empty iterator has no key")
    }
    fn value(&self) -> &[u8] {
        unreachable!("empty iterator has no value")
    }
    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges N children in internal-key order.
///
/// Children are ordered newest source first; on equal internal keys the
/// lower index wins, which keeps fresher sources shadowing older ones.
/// Changing scan direction reseeks every non-current child around the
/// current key, so the next entry is strictly on the other side of the
/// last one returned.
pub struct MergingIterator {
    children: Vec<Box<dyn InternalIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub fn new(children: Vec<Box<dyn InternalIterator>>) -> Self {
        MergingIterator {
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match smallest {
                None => smallest = Some(i),
                Some(s) => {
                    if compare_internal_keys(child.key(), self.children[s].key())
                        == Ordering::Less
                    {
                        smallest = Some(i);
                    }
                }
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.valid() {
                continue;
            }
            match largest {
                None => largest = Some(i),
                Some(l) => {
                    if compare_internal_keys(child.key(), self.children[l].key())
                        == Ordering::Greater
                    {
                        largest = Some(i);
                    }
                }
            }
        }
        self.current = largest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        let Some(current) = self.current else { return };

        if self.direction != Direction::Forward {
            // Every other child must sit at the first entry after the
            // current key before we can advance.
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid() && child.key() == key.as_slice() {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        let Some(current) = self.current else { return };

        if self.direction != Direction::Reverse {
            // Park every other child on the entry before the current key.
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid() {
                    child.prev();
                } else {
                    // All of this child's entries precede the key.
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        self.children[self.current.expect("iterator not valid")].key()
    }

    fn value(&self) -> &[u8] {
        self.children[self.current.expect("iterator not valid")].value()
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}

/// Opens the sub-iterator an index entry's value refers to.
pub type SubIteratorFactory = Box<dyn Fn(&[u8]) -> Result<Box<dyn InternalIterator>>>;

/// Walks an index iterator and, for each index entry, the sub-iterator it
/// points at. Used for table reads (index block over data blocks) and for
/// the sorted levels (file list over tables).
pub struct TwoLevelIterator {
    index_iter: Box<dyn InternalIterator>,
    data_iter: Option<Box<dyn InternalIterator>>,
    factory: SubIteratorFactory,
    // Index value the current data_iter was opened from.
    data_handle: Vec<u8>,
    error: Option<crate::error::Error>,
}

impl TwoLevelIterator {
    pub fn new(index_iter: Box<dyn InternalIterator>, factory: SubIteratorFactory) -> Self {
        TwoLevelIterator {
            index_iter,
            data_iter: None,
            factory,
            data_handle: Vec::new(),
            error: None,
        }
    }

    fn init_data_iter(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_handle.as_slice() {
            return;
        }
        self.data_handle = handle.to_vec();
        match (self.factory)(handle) {
            Ok(iter) => self.data_iter = Some(iter),
            Err(err) => {
                self.error.get_or_insert(err);
                self.data_iter = None;
            }
        }
    }

    fn skip_empty_data_iters_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_iter();
            if let Some(data) = self.data_iter.as_mut() {
                data.seek_to_first();
            }
        }
    }

    fn skip_empty_data_iters_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_iter();
            if let Some(data) = self.data_iter.as_mut() {
                data.seek_to_last();
            }
        }
    }
}

impl InternalIterator for TwoLevelIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|d| d.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_iter();
        if let Some(data) = self.data_iter.as_mut() {
            data.seek_to_first();
        }
        self.skip_empty_data_iters_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_iter();
        if let Some(data) = self.data_iter.as_mut() {
            data.seek_to_last();
        }
        self.skip_empty_data_iters_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_iter();
        if let Some(data) = self.data_iter.as_mut() {
            data.seek(target);
        }
        self.skip_empty_data_iters_forward();
    }

    fn next(&mut self) {
        if let Some(data) = self.data_iter.as_mut() {
            data.next();
        }
        self.skip_empty_data_iters_forward();
    }

    fn prev(&mut self) {
        if let Some(data) = self.data_iter.as_mut() {
            data.prev();
        }
        self.skip_empty_data_iters_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator not valid").key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator not valid").value()
    }

    fn status(&self) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.index_iter.status()?;
        if let Some(data) = &self.data_iter {
            data.status()?;
        }
        Ok(())
    }
}
