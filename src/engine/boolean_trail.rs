use crate::basic_types::KeyedVec;
use crate::engine::variables::Literal;
use crate::engine::variables::PropositionalVariable;
use crate::marrow_assert_moderate;
use crate::marrow_assert_simple;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TruthValue {
    Unassigned,
    True,
    False,
}

#[derive(Clone, Copy, Debug)]
struct BooleanTrailEntry {
    literal: Literal,
    /// Index into the reason storage of the integer trail when the literal was
    /// pushed by bound propagation, and no meaning otherwise.
    reason_index: Option<usize>,
}

/// The Boolean assignment together with its trail. Variable 0 is reserved:
/// its positive literal is the always-true literal.
#[derive(Clone, Debug)]
pub struct BooleanTrail {
    values: KeyedVec<PropositionalVariable, TruthValue>,
    assignment_level: KeyedVec<PropositionalVariable, usize>,
    trail: Vec<BooleanTrailEntry>,
    /// At index i is the position where decision level i ends (exclusive).
    trail_delimiter: Vec<usize>,
    pub true_literal: Literal,
    pub false_literal: Literal,
}

impl Default for BooleanTrail {
    fn default() -> Self {
        let mut trail = BooleanTrail {
            values: KeyedVec::default(),
            assignment_level: KeyedVec::default(),
            trail: Vec::default(),
            trail_delimiter: Vec::default(),
            true_literal: Literal::new(PropositionalVariable::new(0), true),
            false_literal: Literal::new(PropositionalVariable::new(0), false),
        };
        let constant = trail.create_new_variable();
        let _ = trail.enqueue(Literal::new(constant, true), None);
        trail
    }
}

impl BooleanTrail {
    pub fn create_new_variable(&mut self) -> PropositionalVariable {
        let _ = self.assignment_level.push(0);
        self.values.push(TruthValue::Unassigned)
    }

    pub fn num_variables(&self) -> usize {
        self.values.len()
    }

    pub fn decision_level(&self) -> usize {
        self.trail_delimiter.len()
    }

    pub fn increase_decision_level(&mut self) {
        self.trail_delimiter.push(self.trail.len());
    }

    pub fn is_true(&self, literal: Literal) -> bool {
        match self.values[literal.variable()] {
            TruthValue::True => literal.is_positive(),
            TruthValue::False => literal.is_negative(),
            TruthValue::Unassigned => false,
        }
    }

    pub fn is_false(&self, literal: Literal) -> bool {
        self.is_true(!literal)
    }

    pub fn is_unassigned(&self, literal: Literal) -> bool {
        self.values[literal.variable()] == TruthValue::Unassigned
    }

    pub fn level_of(&self, variable: PropositionalVariable) -> usize {
        marrow_assert_moderate!(self.values[variable] != TruthValue::Unassigned);
        self.assignment_level[variable]
    }

    /// Makes the literal true. Returns false when it is already false, in
    /// which case nothing is recorded and the caller must handle the conflict.
    pub fn enqueue(&mut self, literal: Literal, reason_index: Option<usize>) -> bool {
        if self.is_false(literal) {
            return false;
        }
        if self.is_true(literal) {
            return true;
        }
        self.values[literal.variable()] = if literal.is_positive() {
            TruthValue::True
        } else {
            TruthValue::False
        };
        self.assignment_level[literal.variable()] = self.decision_level();
        self.trail.push(BooleanTrailEntry {
            literal,
            reason_index,
        });
        true
    }

    /// The number of literals currently on the trail.
    pub fn trail_index(&self) -> usize {
        self.trail.len()
    }

    pub fn literal_at(&self, index: usize) -> Literal {
        self.trail[index].literal
    }

    /// The integer-trail reason slot attached to the literal at `index`, when
    /// it was pushed by bound propagation.
    pub fn reason_index_at(&self, index: usize) -> Option<usize> {
        self.trail[index].reason_index
    }

    /// Undoes all assignments made after `level`.
    pub fn untrail(&mut self, level: usize) {
        marrow_assert_simple!(level < self.decision_level());
        let target = self.trail_delimiter[level];
        for entry in self.trail.drain(target..) {
            self.values[entry.literal.variable()] = TruthValue::Unassigned;
        }
        self.trail_delimiter.truncate(level);
    }
}
