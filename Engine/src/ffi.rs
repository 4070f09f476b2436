/// C ABI for instrumentation hosts (Pin tools, DynamoRIO clients, ...).
///
/// The host owns the `Engine` pointer returned by [`edgeprobe_session_new`] and
/// calls the callbacks from the instrumented thread only.
use core::ffi::{CStr, c_char};

use crate::address_filter::Section;
use crate::branch::{BranchEvent, BranchKind, BranchTarget};
use crate::config::EdgeProbeConfig;
use crate::diagnostics::init_logging;
use crate::engine::{Engine, EngineBuilder};

/// A section of the loaded image, as the host sees it.
#[repr(C)]
pub struct CSection {
    pub name: *const c_char,
    pub base: u64,
    pub size: u64,
    pub executable: bool,
}

unsafe fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
    }
}

/// Start a session. Returns null if the report file or the shared map could
/// not be opened; the host should then exit non-zero.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn edgeprobe_session_new(config: *const EdgeProbeConfig) -> *mut Engine {
    let config = match unsafe { config.as_ref() } {
        Some(raw) => raw.to_engine_config(),
        None => Default::default(),
    };
    init_logging(config.debug);

    match EngineBuilder::from_config(config).build() {
        Ok(engine) => Box::into_raw(Box::new(engine)),
        Err(e) => {
            log::error!("edgeprobe session setup failed: {e}");
            core::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn edgeprobe_on_module_load(
    engine: *mut Engine,
    sections: *const CSection,
    count: usize,
) -> i32 {
    let Some(engine) = (unsafe { engine.as_mut() }) else {
        return -1;
    };
    let raw = if sections.is_null() || count == 0 {
        &[][..]
    } else {
        unsafe { core::slice::from_raw_parts(sections, count) }
    };
    let sections: Vec<Section> = raw
        .iter()
        .map(|s| Section::new(unsafe { lossy(s.name) }, s.base, s.size, s.executable))
        .collect();

    match engine.on_module_load(&sections) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{e}");
            -1
        }
    }
}

/// Structured branch callback. `target` is ignored unless `has_target` is set.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn edgeprobe_on_branch(
    engine: *mut Engine,
    source: u64,
    mnemonic: *const c_char,
    target: u64,
    has_target: bool,
    kind: u32,
) -> bool {
    let Some(engine) = (unsafe { engine.as_mut() }) else {
        return false;
    };
    let Some(kind) = BranchKind::from_raw(kind) else {
        return false;
    };
    let target = if has_target {
        BranchTarget::Direct(target)
    } else {
        BranchTarget::Unknown
    };
    let event = BranchEvent::new(source, unsafe { lossy(mnemonic) }, target, kind);
    engine.on_branch_executed(&event)
}

/// Branch callback for hosts that only hand out the disassembled text.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn edgeprobe_on_branch_disassembly(
    engine: *mut Engine,
    source: u64,
    disassembly: *const c_char,
    kind: u32,
) -> bool {
    let Some(engine) = (unsafe { engine.as_mut() }) else {
        return false;
    };
    let Some(kind) = BranchKind::from_raw(kind) else {
        return false;
    };
    let text = unsafe { lossy(disassembly) };
    engine.on_branch_executed(&BranchEvent::from_disassembly(source, &text, kind))
}

/// Finalize the run and write the report. Returns 0 on success, -1 otherwise.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn edgeprobe_on_process_exit(engine: *mut Engine) -> i32 {
    let Some(engine) = (unsafe { engine.as_mut() }) else {
        return -1;
    };
    match engine.on_process_exit() {
        Ok(_) => 0,
        Err(e) => {
            log::error!("edgeprobe report failed: {e}");
            -1
        }
    }
}

/// Reuse a finalized session for the next run (fork-server style hosts).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn edgeprobe_session_restart(engine: *mut Engine) -> i32 {
    let Some(engine) = (unsafe { engine.as_mut() }) else {
        return -1;
    };
    match engine.restart() {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{e}");
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn edgeprobe_session_free(engine: *mut Engine) {
    if !engine.is_null() {
        drop(unsafe { Box::from_raw(engine) });
    }
}
