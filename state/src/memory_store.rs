use std::cell::RefCell;

use rustc_hash::FxHashMap;

use super::{check_transition, check_unit_id, Error, State, StateStore};

/// In-memory `StateStore`. Units not present in the map are `Absent`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    // RefCell so the trait's `&self` methods can update it:
    states: RefCell<FxHashMap<String, State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a unit's state directly, bypassing transition checks.
    pub fn insert(&self, unit: &str, state: State) {
        self.states.borrow_mut().insert(unit.to_owned(), state);
    }

    pub fn is_empty(&self) -> bool {
        self.states.borrow().is_empty()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, unit: &str) -> Result<State, Error> {
        check_unit_id(unit)?;
        Ok(self
            .states
            .borrow()
            .get(unit)
            .copied()
            .unwrap_or(State::Absent))
    }

    fn transition(&self, unit: &str, from: State, to: State) -> Result<(), Error> {
        check_transition(unit, from, to, self.get(unit)?)?;
        let mut states = self.states.borrow_mut();
        if to == State::Absent {
            states.remove(unit);
        } else {
            states.insert(unit.to_owned(), to);
        }
        Ok(())
    }
}
