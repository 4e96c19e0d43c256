//! Row sources of a join run.
//!
//! [`JoinedCursor`] walks the target's staged rows and expands each one
//! through the join tree, so a target row matching several child rows comes
//! out several times. [`RestrictedCursor`] merges that stream with a plain
//! walk over the target ([`TargetCursor`]) and keeps only the first joined
//! row of every target row.

use crate::{error::ExecutionError, query::JoinQuery};
use engine_core::staging::{StagedRow, StagedRows};
use std::{collections::VecDeque, iter::Peekable, sync::Arc};

/// One combination of staged rows, positioned like [`JoinQuery::aliases`].
/// `None` marks an alias an outer join found no row for.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub target_id: u64,
    pub rows: Vec<Option<StagedRow>>,
}

/// Row ids of the unjoined target, in staging order.
pub struct TargetCursor {
    rows: StagedRows,
}

impl TargetCursor {
    pub(crate) fn new(rows: StagedRows) -> Self {
        TargetCursor { rows }
    }
}

impl Iterator for TargetCursor {
    type Item = Result<u64, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows
            .next()
            .map(|row| row.map(|(id, _)| id).map_err(ExecutionError::from))
    }
}

pub struct JoinedCursor {
    query: Arc<JoinQuery>,
    targets: StagedRows,
    pending: VecDeque<JoinedRow>,
    yielded: u64,
}

impl JoinedCursor {
    pub(crate) fn new(query: Arc<JoinQuery>, targets: StagedRows) -> Self {
        JoinedCursor {
            query,
            targets,
            pending: VecDeque::new(),
            yielded: 0,
        }
    }

    /// Every combination `target` produces. Joins run in tree order, so a
    /// parent's row is settled before its children look it up.
    fn expand(&self, target_id: u64, target: StagedRow) -> Result<Vec<JoinedRow>, ExecutionError> {
        let query = &self.query;
        let mut first = vec![None; query.aliases.len()];
        first[0] = Some(target);
        let mut combos = vec![first];

        for step in &query.steps {
            let mut next = Vec::with_capacity(combos.len());
            for combo in combos {
                let key = combo[step.parent]
                    .as_ref()
                    .and_then(|row| row.get(step.parent_column));
                let matches = match key {
                    Some(key) => step.index.lookup(key)?,
                    None => Vec::new(),
                };

                if matches.is_empty() {
                    if !step.inner {
                        next.push(combo);
                    }
                    continue;
                }
                for row_id in matches {
                    let mut joined = combo.clone();
                    joined[step.child] = query.store.row(&query.aliases[step.child], row_id)?;
                    next.push(joined);
                }
            }
            combos = next;
        }

        Ok(combos
            .into_iter()
            .map(|rows| JoinedRow { target_id, rows })
            .collect())
    }
}

impl Iterator for JoinedCursor {
    type Item = Result<JoinedRow, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                self.yielded += 1;
                return Some(Ok(row));
            }

            let (target_id, target) = match self.targets.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e.into())),
            };
            match self.expand(target_id, target) {
                Ok(rows) => self.pending.extend(rows),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// At most one joined row per target row.
pub struct RestrictedCursor {
    targets: TargetCursor,
    joined: Peekable<JoinedCursor>,
    consumed: u64,
    discarded: u64,
    done: bool,
}

impl RestrictedCursor {
    pub(crate) fn new(targets: TargetCursor, joined: JoinedCursor) -> Self {
        RestrictedCursor {
            targets,
            joined: joined.peekable(),
            consumed: 0,
            discarded: 0,
            done: false,
        }
    }

    /// Target id of the next joined row.
    fn peek_target(&mut self) -> Result<Option<u64>, ExecutionError> {
        match self.joined.peek() {
            None => Ok(None),
            Some(Ok(row)) => Ok(Some(row.target_id)),
            Some(Err(_)) => match self.joined.next() {
                Some(Err(e)) => Err(e),
                _ => Ok(None),
            },
        }
    }

    fn row_for(&mut self, target_id: u64) -> Result<Option<JoinedRow>, ExecutionError> {
        while let Some(id) = self.peek_target()?
            && id < target_id
        {
            self.joined.next();
            self.discarded += 1;
        }

        if self.peek_target()? != Some(target_id) {
            // an inner join dropped this target row
            return Ok(None);
        }
        let Some(Ok(row)) = self.joined.next() else {
            return Ok(None);
        };

        while self.peek_target()? == Some(target_id) {
            self.joined.next();
            self.discarded += 1;
        }
        Ok(Some(row))
    }

    /// Joined rows left once the target is exhausted are trailing
    /// duplicates.
    fn drain(&mut self) -> Result<(), ExecutionError> {
        for row in self.joined.by_ref() {
            row?;
            self.discarded += 1;
        }
        Ok(())
    }
}

impl Iterator for RestrictedCursor {
    type Item = Result<JoinedRow, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let target_id = match self.targets.next() {
                Some(Ok(id)) => id,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.done = true;
                    return self.drain().err().map(Err);
                }
            };
            self.consumed += 1;

            match self.row_for(target_id) {
                Ok(Some(row)) => return Some(Ok(row)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Cursor a run reads from.
pub enum RowCursor {
    Joined(JoinedCursor),
    Restricted(RestrictedCursor),
}

impl RowCursor {
    /// Rows of the driving sequence consumed so far; progress is measured
    /// against this.
    pub fn consumed(&self) -> u64 {
        match self {
            RowCursor::Joined(cursor) => cursor.yielded,
            RowCursor::Restricted(cursor) => cursor.consumed,
        }
    }

    /// Fan-out rows dropped by restriction.
    pub fn discarded(&self) -> u64 {
        match self {
            RowCursor::Joined(_) => 0,
            RowCursor::Restricted(cursor) => cursor.discarded,
        }
    }
}

impl Iterator for RowCursor {
    type Item = Result<JoinedRow, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RowCursor::Joined(cursor) => cursor.next(),
            RowCursor::Restricted(cursor) => cursor.next(),
        }
    }
}
