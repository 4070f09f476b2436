//! Turns the branch-event stream into histogram updates and the run record.
use crate::address_filter::AddressSpaceFilter;
use crate::branch::{BranchEvent, BranchTarget};
use crate::coverage::{CoverageMap, EdgeId};

/// Why an event was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OutsideRegion,
    Untracked,
}

/// One admitted branch, kept in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBranch {
    pub source: u64,
    pub mnemonic: String,
    pub target: BranchTarget,
}

/// Ordered record of every admitted branch of the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRecord {
    branches: Vec<RecordedBranch>,
}

impl RunRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, branch: RecordedBranch) {
        self.branches.push(branch);
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn branches(&self) -> &[RecordedBranch] {
        &self.branches
    }

    pub fn clear(&mut self) {
        self.branches.clear();
    }
}

impl FromIterator<RecordedBranch> for RunRecord {
    fn from_iter<T: IntoIterator<Item = RecordedBranch>>(iter: T) -> Self {
        Self {
            branches: iter.into_iter().collect(),
        }
    }
}

/// Edge-tracking state for one run.
///
/// `previous_branch_id` starts at 0, which is also the id of a branch sitting
/// exactly at the region base; the two are not told apart.
#[derive(Debug, Default)]
pub struct EdgeTracker {
    previous_branch_id: u64,
    record: RunRecord,
    trace: bool,
}

impl EdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every admitted branch at debug level.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Admit `event` if it is a tracked branch inside the filter's region,
    /// bump its edge counter in `map` and append it to the run record.
    pub fn on_branch(
        &mut self,
        filter: &AddressSpaceFilter,
        map: &mut CoverageMap,
        event: &BranchEvent,
    ) -> Result<EdgeId, Rejection> {
        if !filter.is_within(event.source) {
            log::trace!("branch {:#x} outside code region", event.source);
            return Err(Rejection::OutsideRegion);
        }
        if !event.kind.is_tracked() {
            log::trace!("branch {:#x} is a {:?}", event.source, event.kind);
            return Err(Rejection::Untracked);
        }

        let branch_id = event.source - filter.region().base;
        let edge = EdgeId::from_transition(branch_id, self.previous_branch_id);
        map.increment(edge);

        if self.trace {
            match event.target {
                BranchTarget::Direct(target) => log::debug!(
                    "BRANCH: {:#x}:\t{} {:#x}",
                    event.source,
                    event.mnemonic,
                    target
                ),
                BranchTarget::Unknown => {
                    log::debug!("BRANCH: {:#x}:\t{} ?", event.source, event.mnemonic)
                }
            }
        }

        self.record.push(RecordedBranch {
            source: event.source,
            mnemonic: event.mnemonic.clone(),
            target: event.target,
        });
        self.previous_branch_id = branch_id;
        Ok(edge)
    }

    pub fn previous_branch_id(&self) -> u64 {
        self.previous_branch_id
    }

    pub fn admitted(&self) -> usize {
        self.record.len()
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Hand the record to the caller and start the next run from scratch.
    pub fn take_record(&mut self) -> RunRecord {
        self.previous_branch_id = 0;
        core::mem::take(&mut self.record)
    }

    pub fn reset(&mut self) {
        self.previous_branch_id = 0;
        self.record.clear();
    }
}
