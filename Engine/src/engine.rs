/// Engine — one probe session, driven by host callbacks.
use std::path::PathBuf;

use libafl_bolts::Error;

use crate::address_filter::{AddressSpaceFilter, CodeRegion, Section};
use crate::branch::BranchEvent;
use crate::config::{EngineConfig, SharedMapSource};
use crate::coverage::CoverageMap;
use crate::diagnostics::init_logging;
use crate::report::{Report, ReportSink};
use crate::signature::SignatureComputer;
use crate::tracker::EdgeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Tracking,
    Finalized,
}

/// Builder for configuring an [`Engine`].
///
/// # Example
/// ```rust,no_run
/// # use edgeprobe::EngineBuilder;
/// let mut engine = EngineBuilder::new()
///     .output_path("./run.out")
///     .debug(true)
///     .local_map()
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Set the file the report line is written to.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    /// Enable the per-branch trace. `build` then registers the stderr logger
    /// at debug level.
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Attach to the shared coverage map with the given id.
    pub fn shared_map(mut self, id: impl Into<String>) -> Self {
        self.config.shared_map = SharedMapSource::Id(id.into());
        self
    }

    /// Use a private coverage map even if a fuzzer announced a shared one.
    pub fn local_map(mut self) -> Self {
        self.config.shared_map = SharedMapSource::Local;
        self
    }

    /// Open the report sink and the coverage map. Fails if either cannot be set up.
    pub fn build(self) -> Result<Engine, Error> {
        if self.config.debug {
            init_logging(true);
        }
        let map = match &self.config.shared_map {
            SharedMapSource::Local => CoverageMap::local(),
            SharedMapSource::Id(id) => CoverageMap::shared(id)?,
            SharedMapSource::FromEnv => {
                CoverageMap::shared_from_env()?.unwrap_or_else(CoverageMap::local)
            }
        };
        Engine::with_map(self.config, map)
    }
}

/// State of one instrumented process.
///
/// `Uninitialized` until the host reports the loaded image, `Tracking` while
/// the target runs, `Finalized` once the exit callback produced the report.
#[derive(Debug)]
pub struct Engine {
    state: EngineState,
    filter: AddressSpaceFilter,
    tracker: EdgeTracker,
    map: CoverageMap,
    sink: ReportSink,
    last_report: Option<Report>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a session over an already constructed map.
    pub fn with_map(config: EngineConfig, map: CoverageMap) -> Result<Self, Error> {
        let sink = ReportSink::create(&config.output_path)?;
        Ok(Self {
            state: EngineState::Uninitialized,
            filter: AddressSpaceFilter::new(),
            tracker: EdgeTracker::new().with_trace(config.debug),
            map,
            sink,
            last_report: None,
        })
    }

    /// Host notification that the target image is loaded.
    pub fn on_module_load(&mut self, sections: &[Section]) -> Result<(), Error> {
        if self.state == EngineState::Finalized {
            return Err(Error::illegal_state("module load after process exit"));
        }

        let matched = self.filter.discover(sections);
        if self.state == EngineState::Uninitialized {
            if self.filter.has_region() {
                log::info!("tracking branches in {} section(s)", matched);
            } else {
                log::warn!(
                    "no executable .text section among {} section(s), no branch will be tracked",
                    sections.len()
                );
            }
            if !self.map.is_shared() {
                self.map.reset();
            }
            self.state = EngineState::Tracking;
        }
        Ok(())
    }

    /// Host notification that a branch executed. Returns whether it was admitted.
    #[inline]
    pub fn on_branch_executed(&mut self, event: &BranchEvent) -> bool {
        if self.state != EngineState::Tracking {
            return false;
        }
        self.tracker
            .on_branch(&self.filter, &mut self.map, event)
            .is_ok()
    }

    /// Host notification that the process is exiting: compute the signature and
    /// write the report line.
    pub fn on_process_exit(&mut self) -> Result<Report, Error> {
        if self.state == EngineState::Finalized {
            return Err(Error::illegal_state("process exit reported twice"));
        }

        let region_discovered = self.filter.has_region();
        if !region_discovered {
            log::warn!(
                "run finished without a code region, the report for {} has zero edges",
                self.sink.path().display()
            );
        }

        let record = self.tracker.take_record();
        let signature = SignatureComputer::new(self.filter.region().base).finalize(&record);
        let report = Report {
            admitted: record.len(),
            signature: signature.value,
            sub_hashes: signature.parts,
            region_discovered,
        };

        self.state = EngineState::Finalized;
        self.last_report = Some(report);
        self.sink.write(&report)?;
        log::info!("report {report} written to {}", self.sink.path().display());
        Ok(report)
    }

    /// Prepare a finalized session for the next run of the same image.
    /// The shared histogram keeps its counts, a local one is cleared.
    pub fn restart(&mut self) -> Result<(), Error> {
        if self.state != EngineState::Finalized {
            return Err(Error::illegal_state("restart before process exit"));
        }
        self.tracker.reset();
        if !self.map.is_shared() {
            self.map.reset();
        }
        self.last_report = None;
        self.state = EngineState::Tracking;
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn region(&self) -> CodeRegion {
        self.filter.region()
    }

    pub fn admitted(&self) -> usize {
        self.tracker.admitted()
    }

    pub fn coverage(&self) -> &CoverageMap {
        &self.map
    }

    pub fn coverage_mut(&mut self) -> &mut CoverageMap {
        &mut self.map
    }

    pub fn last_report(&self) -> Option<&Report> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::branch::{BranchKind, BranchTarget};

    fn engine(dir: &tempfile::TempDir) -> Engine {
        Engine::builder()
            .output_path(dir.path().join("branchcount.out"))
            .local_map()
            .build()
            .unwrap()
    }

    fn text() -> Vec<Section> {
        vec![
            Section::new(".plt", 0x0f00, 0x100, true),
            Section::new(".text", 0x1000, 0x100, true),
        ]
    }

    #[test]
    fn lifecycle_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        assert_eq!(engine.state(), EngineState::Uninitialized);

        // nothing is tracked before the image is known
        assert!(!engine.on_branch_executed(&BranchEvent::conditional(0x1000, "jz", 0x1010)));

        engine.on_module_load(&text()).unwrap();
        assert_eq!(engine.state(), EngineState::Tracking);
        assert!(engine.on_branch_executed(&BranchEvent::conditional(0x1000, "jz", 0x1010)));

        let report = engine.on_process_exit().unwrap();
        assert_eq!(engine.state(), EngineState::Finalized);
        assert_eq!(report.admitted, 1);
        assert!(report.region_discovered);
        assert_eq!(engine.last_report(), Some(&report));

        assert!(!engine.on_branch_executed(&BranchEvent::conditional(0x1000, "jz", 0x1010)));
        assert!(engine.on_process_exit().is_err());
        assert!(engine.on_module_load(&text()).is_err());
    }

    #[test]
    fn module_load_while_tracking_grows_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        engine.on_module_load(&text()).unwrap();
        engine
            .on_module_load(&[Section::new(".text", 0x4000, 0x10, true)])
            .unwrap();
        assert_eq!(engine.region(), CodeRegion { base: 0x1000, limit: 0x4010 });
        assert_eq!(engine.state(), EngineState::Tracking);
    }

    #[test]
    fn missing_code_section_is_reported_not_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        engine
            .on_module_load(&[Section::new(".init", 0x1000, 0x10, true)])
            .unwrap();
        assert!(!engine.on_branch_executed(&BranchEvent::conditional(0x1000, "jz", 0x1010)));

        let report = engine.on_process_exit().unwrap();
        assert!(!report.region_discovered);
        assert_eq!(report.admitted, 0);
        assert_eq!(report.signature, 1_617_193_579);
    }

    #[test]
    fn exit_without_start_finalizes_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let report = engine.on_process_exit().unwrap();
        assert_eq!(report.admitted, 0);
        assert!(!report.region_discovered);
    }

    #[test]
    fn restart_clears_run_state_and_local_map() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        assert!(engine.restart().is_err());

        engine.on_module_load(&text()).unwrap();
        engine.on_branch_executed(&BranchEvent::conditional(0x1010, "jz", 0x1000));
        engine.on_branch_executed(&BranchEvent::new(
            0x1020,
            "call",
            BranchTarget::Unknown,
            BranchKind::Call,
        ));
        let first = engine.on_process_exit().unwrap();
        assert_eq!(first.admitted, 2);
        assert_eq!(engine.coverage().hit_edges(), 2);

        engine.restart().unwrap();
        assert_eq!(engine.state(), EngineState::Tracking);
        assert_eq!(engine.admitted(), 0);
        assert_eq!(engine.coverage().hit_edges(), 0);
        assert_eq!(engine.last_report(), None);

        engine.on_branch_executed(&BranchEvent::conditional(0x1010, "jz", 0x1000));
        engine.on_branch_executed(&BranchEvent::new(
            0x1020,
            "call",
            BranchTarget::Unknown,
            BranchKind::Call,
        ));
        let second = engine.on_process_exit().unwrap();
        assert_eq!(first, second);

        let written = std::fs::read_to_string(dir.path().join("branchcount.out")).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], lines[1]);
    }

    #[test]
    #[serial]
    fn debug_build_enables_branch_trace_logging() {
        let dir = tempfile::tempdir().unwrap();
        crate::diagnostics::init_logging(false);
        let _engine = Engine::builder()
            .output_path(dir.path().join("branchcount.out"))
            .debug(true)
            .local_map()
            .build()
            .unwrap();
        assert_eq!(log::max_level(), log::LevelFilter::Debug);
        crate::diagnostics::init_logging(false);
    }

    #[test]
    fn unwritable_output_fails_at_build() {
        let dir = tempfile::tempdir().unwrap();
        let result = Engine::builder()
            .output_path(dir.path().join("no").join("such").join("dir"))
            .local_map()
            .build();
        assert!(result.is_err());
    }
}
