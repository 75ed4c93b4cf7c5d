//! Executor journal.
//!
//! An append-only file in the database directory logging step boundaries.
//! Each record is one JSON line written with an fsync, so after a crash
//! the journal tells the executor exactly how far a plan got: steps with a
//! completion record are done, a step with filesystem work recorded but no
//! completion needs its database write redone, anything else is re-run.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    /// A plan started.
    PlanBegin {
        /// Fingerprint of the plan (step kinds and uids).
        plan_id: String,
        /// Step count.
        steps: usize,
    },
    /// A step started.
    StepBegin {
        /// Step index within the plan.
        index: usize,
        /// Step kind tag.
        kind: String,
        /// Uid the step operates on.
        uid: String,
    },
    /// The step's filesystem work finished; its DB write may not have.
    FilesDone {
        /// Step index within the plan.
        index: usize,
    },
    /// A step finished.
    StepEnd {
        /// Step index within the plan.
        index: usize,
        /// Whether the step succeeded.
        ok: bool,
    },
    /// The plan committed; the journal may be truncated.
    PlanEnd {
        /// Fingerprint of the plan.
        plan_id: String,
    },
}

/// How far a step got, reconstructed from the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Step began but its filesystem work is not recorded as finished.
    Begun,
    /// Filesystem work finished; database write may be missing.
    FilesDone,
    /// Step completed successfully.
    Done,
    /// Step completed with a failure.
    Failed,
}

/// Append-only journal handle.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// What: Open (creating if needed) the journal for appending.
    ///
    /// Inputs:
    /// - `path`: Journal path, conventionally `<db_dir>/.pkg.journal`.
    ///
    /// Output:
    /// - The handle.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// What: Append one record with durability.
    ///
    /// Inputs:
    /// - `record`: Record to append.
    ///
    /// Output:
    /// - Unit, after the write and fsync both succeeded.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` on write or sync failure.
    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{line}")?;
        self.file.sync_all()?;
        Ok(())
    }

    /// What: Read every intact record currently in the journal.
    ///
    /// Inputs:
    /// - `path`: Journal path.
    ///
    /// Output:
    /// - Records in append order. A torn trailing line (crash mid-write)
    ///   is ignored; a torn line elsewhere is corrupt.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` on read failure.
    pub fn read(path: &Path) -> Result<Vec<JournalRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        let mut lines = reader.lines().peekable();
        while let Some(line) = lines.next() {
            let line = line?;
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) if lines.peek().is_none() => {
                    tracing::warn!(error = %e, "ignoring torn trailing journal record");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed journal record");
                }
            }
        }
        Ok(records)
    }

    /// What: Reconstruct per-step state of an uncommitted plan.
    ///
    /// Inputs:
    /// - `path`: Journal path.
    /// - `plan_id`: Fingerprint of the plan being resumed.
    ///
    /// Output:
    /// - `Some(states)` keyed by step index when the journal ends inside
    ///   the named plan; `None` when the journal is clean or belongs to a
    ///   different plan.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` on read failure.
    pub fn dirty_state(
        path: &Path,
        plan_id: &str,
    ) -> Result<Option<std::collections::BTreeMap<usize, StepState>>> {
        let records = Self::read(path)?;
        let mut current: Option<String> = None;
        let mut states = std::collections::BTreeMap::new();
        for record in records {
            match record {
                JournalRecord::PlanBegin { plan_id, .. } => {
                    current = Some(plan_id);
                    states.clear();
                }
                JournalRecord::PlanEnd { .. } => {
                    current = None;
                    states.clear();
                }
                JournalRecord::StepBegin { index, .. } => {
                    states.insert(index, StepState::Begun);
                }
                JournalRecord::FilesDone { index } => {
                    states.insert(index, StepState::FilesDone);
                }
                JournalRecord::StepEnd { index, ok } => {
                    states.insert(
                        index,
                        if ok { StepState::Done } else { StepState::Failed },
                    );
                }
            }
        }
        Ok(match current {
            Some(open_plan) if open_plan == plan_id => Some(states),
            _ => None,
        })
    }

    /// What: Truncate the journal after a fully committed plan.
    ///
    /// Inputs: None
    ///
    /// Output:
    /// - Unit; the file is empty afterwards.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` on truncation failure.
    pub fn truncate(&mut self) -> Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file.sync_all()?;
        Ok(())
    }
}
