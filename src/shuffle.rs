//! Sort and group between pipeline stages.
//!
//! This is the local stand-in for the cluster shuffle: stage output is sorted
//! by key (stable, so equal keys keep their emission order) and consecutive
//! equal keys are merged into groups that are consumed exactly once.

use std::cell::RefCell;
use std::iter::Peekable;
use std::rc::Rc;

use crate::encode::Value;
use crate::KeyValue;

/// Stable sort by key, using the total order of [`Value`].
pub fn sort(mut records: Vec<KeyValue>) -> Vec<KeyValue> {
    records.sort_by(|a, b| a.key.cmp(&b.key));
    records
}

/// Groups consecutive equal keys of an already sorted sequence.
///
/// Input is pulled lazily. Each [`Group`] is single pass; asking for the next
/// group skips whatever the previous one left unread.
pub fn group<I>(sorted: I) -> Grouped<I::IntoIter>
where
    I: IntoIterator<Item = KeyValue>,
{
    Grouped {
        state: Rc::new(RefCell::new(GroupState {
            iter: sorted.into_iter().peekable(),
            key: None,
            epoch: 0,
        })),
    }
}

/// `group(sort(records))`.
pub fn shuffle(records: Vec<KeyValue>) -> Grouped<std::vec::IntoIter<KeyValue>> {
    group(sort(records))
}

struct GroupState<I: Iterator<Item = KeyValue>> {
    iter: Peekable<I>,
    key: Option<Value>,
    epoch: u64,
}

impl<I: Iterator<Item = KeyValue>> GroupState<I> {
    fn next_in_group(&mut self) -> Option<Value> {
        let key = self.key.as_ref()?;
        self.iter.next_if(|kv| &kv.key == key).map(KeyValue::into_value)
    }
}

/// Iterator of `(key, values)` groups, see [`group`].
pub struct Grouped<I: Iterator<Item = KeyValue>> {
    state: Rc<RefCell<GroupState<I>>>,
}

impl<I: Iterator<Item = KeyValue>> Iterator for Grouped<I> {
    type Item = (Value, Group<I>);

    fn next(&mut self) -> Option<Self::Item> {
        let mut state = self.state.borrow_mut();
        while state.next_in_group().is_some() {}

        let key = state.iter.peek()?.key.clone();
        state.key = Some(key.clone());
        state.epoch += 1;
        let group = Group {
            state: Rc::clone(&self.state),
            epoch: state.epoch,
        };
        Some((key, group))
    }
}

/// The values of one key, in their original order.
pub struct Group<I: Iterator<Item = KeyValue>> {
    state: Rc<RefCell<GroupState<I>>>,
    epoch: u64,
}

impl<I: Iterator<Item = KeyValue>> Iterator for Group<I> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let mut state = self.state.borrow_mut();
        if state.epoch != self.epoch {
            return None;
        }
        state.next_in_group()
    }
}
