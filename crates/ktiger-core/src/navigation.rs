//! Navigable-unit view over a section's questions.
//!
//! Questions sharing a `group_id` are displayed together and navigated as a
//! single step. A `NavigationPlan` precomputes the units once per section so
//! forward/backward moves are plain unit arithmetic instead of index scans.

use std::ops::Range;

use crate::model::{GroupId, Question, QuestionId};

/// One navigation step: an ungrouped question or a whole run of grouped ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavUnit {
    /// Question indices covered by this unit (contiguous, non-empty).
    pub range: Range<usize>,
    pub group_id: Option<GroupId>,
}

impl NavUnit {
    pub fn start(&self) -> usize {
        self.range.start
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn is_grouped(&self) -> bool {
        self.range.len() > 1
    }
}

/// Stable key for per-unit bookkeeping (audio autoplay, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKey {
    Group(GroupId),
    Question(QuestionId),
}

#[derive(Debug, Clone, Default)]
pub struct NavigationPlan {
    units: Vec<NavUnit>,
    /// Question index -> unit index.
    owner: Vec<usize>,
    keys: Vec<UnitKey>,
}

impl NavigationPlan {
    /// Build the plan for questions already sorted by question number.
    ///
    /// Only *adjacent* questions with the same group id are merged; a group
    /// id reappearing later starts a new unit.
    pub fn build(questions: &[Question]) -> Self {
        let mut units: Vec<NavUnit> = Vec::new();
        let mut owner = Vec::with_capacity(questions.len());
        let mut keys = Vec::new();

        for (idx, q) in questions.iter().enumerate() {
            let extends_previous = match (units.last(), q.group_id) {
                (Some(last), Some(gid)) => last.group_id == Some(gid),
                _ => false,
            };
            if extends_previous {
                if let Some(last) = units.last_mut() {
                    last.range.end = idx + 1;
                }
            } else {
                units.push(NavUnit {
                    range: idx..idx + 1,
                    group_id: q.group_id,
                });
                keys.push(match q.group_id {
                    Some(gid) => UnitKey::Group(gid),
                    None => UnitKey::Question(q.question_id),
                });
            }
            owner.push(units.len() - 1);
        }

        Self { units, owner, keys }
    }

    pub fn units(&self) -> &[NavUnit] {
        &self.units
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn question_count(&self) -> usize {
        self.owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit index owning question `idx`, if in range.
    pub fn unit_of(&self, idx: usize) -> Option<usize> {
        self.owner.get(idx).copied()
    }

    pub fn unit(&self, unit_idx: usize) -> Option<&NavUnit> {
        self.units.get(unit_idx)
    }

    pub fn key(&self, unit_idx: usize) -> Option<UnitKey> {
        self.keys.get(unit_idx).copied()
    }

    /// Clamp `idx` into range and snap it to the first question of its unit.
    pub fn normalize(&self, idx: usize) -> usize {
        if self.owner.is_empty() {
            return 0;
        }
        let clamped = idx.min(self.owner.len() - 1);
        self.units[self.owner[clamped]].start()
    }

    /// First question of the next unit, or `None` at the last unit.
    pub fn next(&self, idx: usize) -> Option<usize> {
        let unit = self.unit_of(idx)?;
        self.units.get(unit + 1).map(NavUnit::start)
    }

    /// First question of the previous unit, or `None` at the first unit.
    pub fn prev(&self, idx: usize) -> Option<usize> {
        let unit = self.unit_of(idx)?;
        let prev = unit.checked_sub(1)?;
        self.units.get(prev).map(NavUnit::start)
    }

    pub fn is_last_unit(&self, idx: usize) -> bool {
        match self.unit_of(idx) {
            Some(unit) => unit + 1 == self.units.len(),
            // An empty section is trivially at its end.
            None => self.units.is_empty(),
        }
    }

    /// Question indices displayed together with question `idx`.
    pub fn visible_range(&self, idx: usize) -> Range<usize> {
        self.unit_of(idx)
            .map(|u| self.units[u].range.clone())
            .unwrap_or(0..0)
    }
}
