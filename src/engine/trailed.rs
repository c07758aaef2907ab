use crate::basic_types::KeyedVec;
use crate::basic_types::StorageKey;
use crate::marrow_assert_simple;

/// A handle to a reversible integer stored in [`TrailedValues`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TrailedInteger {
    id: u32,
}

impl StorageKey for TrailedInteger {
    fn index(&self) -> usize {
        self.id as usize
    }

    fn create_from_index(index: usize) -> Self {
        TrailedInteger { id: index as u32 }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrailedChange {
    old_value: i64,
    reference: TrailedInteger,
}

/// Central storage for reversible integers: values written at decision level
/// `l` are restored when synchronising below `l`. Propagators keep
/// [`TrailedInteger`] handles instead of owning reversible state themselves.
///
/// Every effective write records the overwritten value; synchronising undoes
/// the recorded changes newest-first, so repeated writes to one handle
/// unwind to the value it had when the level started.
#[derive(Default, Debug)]
pub struct TrailedValues {
    values: KeyedVec<TrailedInteger, i64>,
    /// The changes to undo, most recent last.
    changes: Vec<TrailedChange>,
    /// At index i is the number of recorded changes when level i ended.
    level_delimiters: Vec<usize>,
}

impl TrailedValues {
    pub fn grow(&mut self, initial_value: i64) -> TrailedInteger {
        self.values.push(initial_value)
    }

    pub fn read(&self, trailed_integer: TrailedInteger) -> i64 {
        self.values[trailed_integer]
    }

    pub fn increase_decision_level(&mut self) {
        self.level_delimiters.push(self.changes.len());
    }

    pub fn decision_level(&self) -> usize {
        self.level_delimiters.len()
    }

    /// Restores every value written above the given decision level.
    pub fn synchronise(&mut self, new_decision_level: usize) {
        if new_decision_level >= self.decision_level() {
            return;
        }
        let target = self.level_delimiters[new_decision_level];
        marrow_assert_simple!(target <= self.changes.len());
        for change in self.changes.drain(target..).rev() {
            self.values[change.reference] = change.old_value;
        }
        self.level_delimiters.truncate(new_decision_level);
    }

    pub fn assign(&mut self, trailed_integer: TrailedInteger, value: i64) {
        let old_value = self.values[trailed_integer];
        if old_value == value {
            return;
        }
        self.changes.push(TrailedChange {
            old_value,
            reference: trailed_integer,
        });
        self.values[trailed_integer] = value;
    }

    pub fn add_assign(&mut self, trailed_integer: TrailedInteger, addition: i64) {
        self.assign(trailed_integer, self.values[trailed_integer] + addition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_restored_on_synchronise() {
        let mut values = TrailedValues::default();
        let handle = values.grow(0);

        values.increase_decision_level();
        values.assign(handle, 5);
        values.add_assign(handle, 5);
        assert_eq!(values.read(handle), 10);

        values.increase_decision_level();
        values.assign(handle, 11);

        values.synchronise(1);
        assert_eq!(values.read(handle), 10);

        values.synchronise(0);
        assert_eq!(values.read(handle), 0);
    }

    #[test]
    fn synchronising_at_or_above_the_current_level_is_a_no_op() {
        let mut values = TrailedValues::default();
        let handle = values.grow(3);

        values.increase_decision_level();
        values.assign(handle, 7);

        values.synchronise(1);
        assert_eq!(values.read(handle), 7);
        values.synchronise(5);
        assert_eq!(values.read(handle), 7);
        assert_eq!(values.decision_level(), 1);
    }

    #[test]
    fn changes_across_levels_unwind_in_reverse_order() {
        let mut values = TrailedValues::default();
        let a = values.grow(0);
        let b = values.grow(100);

        values.increase_decision_level();
        values.assign(a, 1);
        values.assign(b, 101);
        values.increase_decision_level();
        values.assign(a, 2);

        values.synchronise(0);
        assert_eq!(values.read(a), 0);
        assert_eq!(values.read(b), 100);
        assert_eq!(values.decision_level(), 0);
    }
}
