//! The per-run report line and where it gets written.
use core::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use libafl_bolts::Error;

use crate::signature::SubHashes;

/// Outcome of one finalized run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    /// Branch events admitted during the run.
    pub admitted: usize,
    pub signature: u32,
    pub sub_hashes: SubHashes,
    /// `false` when no code section was found and nothing could be tracked.
    pub region_discovered: bool,
}

/// `<admitted>\t<signature>`, signature in unsigned decimal.
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.admitted, self.signature)
    }
}

/// Destination of report lines, opened when the session starts so an
/// unwritable path fails before the target runs.
#[derive(Debug)]
pub struct ReportSink {
    path: PathBuf,
    file: File,
}

impl ReportSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            log::error!("cannot open report file {}: {e}", path.display());
            Error::from(e)
        })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, report: &Report) -> Result<(), Error> {
        writeln!(self.file, "{report}")?;
        self.file.flush()?;
        Ok(())
    }
}
