/// Configuration types, for Rust callers and for the C ABI boundary.
use std::path::PathBuf;

pub const DEFAULT_OUTPUT_PATH: &str = "branchcount.out";

/// Where the coverage histogram lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SharedMapSource {
    /// Private buffer, reset every run.
    Local,
    /// Attach to the map named in `__AFL_SHM_ID` when it is set, else local.
    #[default]
    FromEnv,
    /// Attach to the map with this id.
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub output_path: PathBuf,
    /// Stream a per-branch trace to stderr.
    pub debug: bool,
    pub shared_map: SharedMapSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            debug: false,
            shared_map: SharedMapSource::default(),
        }
    }
}

#[repr(C)]
pub struct EdgeProbeConfig {
    /// Path for the report line. Null = "branchcount.out".
    pub output_path: *const core::ffi::c_char,
    pub debug: bool,
    /// Shared coverage map id. Null = read `__AFL_SHM_ID`.
    pub shm_id: *const core::ffi::c_char,
}

impl EdgeProbeConfig {
    pub fn output_path_or_default(&self) -> PathBuf {
        if self.output_path.is_null() {
            PathBuf::from(DEFAULT_OUTPUT_PATH)
        } else {
            unsafe {
                PathBuf::from(
                    core::ffi::CStr::from_ptr(self.output_path)
                        .to_string_lossy()
                        .into_owned(),
                )
            }
        }
    }

    pub fn shared_map_or_default(&self) -> SharedMapSource {
        if self.shm_id.is_null() {
            SharedMapSource::FromEnv
        } else {
            let id = unsafe { core::ffi::CStr::from_ptr(self.shm_id).to_string_lossy() };
            SharedMapSource::Id(id.into_owned())
        }
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            output_path: self.output_path_or_default(),
            debug: self.debug,
            shared_map: self.shared_map_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_fields_fall_back_to_defaults() {
        let raw = EdgeProbeConfig {
            output_path: core::ptr::null(),
            debug: false,
            shm_id: core::ptr::null(),
        };
        assert_eq!(raw.to_engine_config(), EngineConfig::default());
    }

    #[test]
    fn reads_c_strings() {
        let path = c"/tmp/probe.out";
        let id = c"1234";
        let raw = EdgeProbeConfig {
            output_path: path.as_ptr(),
            debug: true,
            shm_id: id.as_ptr(),
        };
        let config = raw.to_engine_config();
        assert_eq!(config.output_path, PathBuf::from("/tmp/probe.out"));
        assert!(config.debug);
        assert_eq!(config.shared_map, SharedMapSource::Id("1234".into()));
    }
}
