//! FFI bindings for Cradle Forecast
//!
//! This module provides C-compatible functions for calling the engine from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `cradle_free_string`.
//!
//! Timestamps cross the boundary as ISO-8601 local strings (`2024-03-10T14:00:00`).

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::clock::parse_timestamp;
use crate::config::EngineConfig;
use crate::engine::{forecast_to_json, ForecastEngine};
use crate::error::ComputeError;
use crate::profile::ProfileSet;
use crate::snapshot::Snapshot;
use crate::types::{Subject, Timestamp};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Read a required string argument, recording an error when missing
unsafe fn required_arg(ptr: *const c_char, name: &str) -> Result<String, ComputeError> {
    cstr_to_string(ptr).ok_or_else(|| ComputeError::ParseError(format!("Invalid {name} string pointer")))
}

unsafe fn now_arg(ptr: *const c_char) -> Result<Timestamp, ComputeError> {
    parse_timestamp(&required_arg(ptr, "now")?)
}

/// Turn a JSON-producing result into an owned C string, or NULL with the error recorded
fn into_cstr(result: Result<String, ComputeError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ComputeError> {
    serde_json::to_string(value).map_err(|e| ComputeError::EncodingError(e.to_string()))
}

// ============================================================================
// Stateless API
// ============================================================================

/// Forecast a JSON snapshot and return the household report JSON.
///
/// # Safety
/// - `snapshot_json` and `now` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `cradle_free_string`.
/// - Returns NULL on error; call `cradle_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cradle_forecast(snapshot_json: *const c_char, now: *const c_char) -> *mut c_char {
    clear_last_error();
    into_cstr((|| {
        let json = required_arg(snapshot_json, "snapshot JSON")?;
        forecast_to_json(&json, now_arg(now)?)
    })())
}

// ============================================================================
// Stateful Engine API
// ============================================================================

/// Opaque handle to a ForecastEngine
pub struct CradleEngineHandle {
    engine: ForecastEngine,
}

/// Create an engine from optional configuration and profile JSON.
///
/// # Safety
/// - `config_json` and `profiles_json` may be NULL to use defaults, otherwise
///   they must be valid null-terminated C strings.
/// - Must be freed with `cradle_engine_free`.
/// - Returns NULL on error; call `cradle_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cradle_engine_new(
    config_json: *const c_char,
    profiles_json: *const c_char,
) -> *mut CradleEngineHandle {
    clear_last_error();

    let built = (|| {
        let config = match cstr_to_string(config_json) {
            Some(json) => EngineConfig::from_json(&json)?,
            None => EngineConfig::default(),
        };
        let profiles = match cstr_to_string(profiles_json) {
            Some(json) => ProfileSet::from_json(&json)?,
            None => ProfileSet::default(),
        };
        ForecastEngine::try_new(config, profiles)
    })();

    match built {
        Ok(engine) => Box::into_raw(Box::new(CradleEngineHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `cradle_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn cradle_engine_free(engine: *mut CradleEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Household report for a snapshot (JSON document or NDJSON log).
///
/// Profiles embedded in the snapshot are ignored; the engine's own are used.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `cradle_engine_new`.
/// - `snapshot` and `now` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `cradle_free_string`.
/// - Returns NULL on error; call `cradle_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cradle_engine_report(
    engine: *const CradleEngineHandle,
    snapshot: *const c_char,
    now: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    into_cstr((|| {
        let snapshot = Snapshot::parse(&required_arg(snapshot, "snapshot")?)?;
        handle.engine.report(&snapshot, now_arg(now)?).to_json()
    })())
}

/// Next-feed prediction for one subject (`"a"` or `"b"`).
///
/// # Safety
/// - `engine` must be a valid pointer returned by `cradle_engine_new`.
/// - `subject`, `snapshot` and `now` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `cradle_free_string`.
/// - Returns NULL on error; call `cradle_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cradle_engine_predict(
    engine: *const CradleEngineHandle,
    subject: *const c_char,
    snapshot: *const c_char,
    now: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    into_cstr((|| {
        let subject = Subject::parse(&required_arg(subject, "subject")?)?;
        let snapshot = Snapshot::parse(&required_arg(snapshot, "snapshot")?)?;
        let prediction = handle
            .engine
            .predict_next_feed(subject, &snapshot.feeds, &snapshot.sleeps, now_arg(now)?);
        to_json(&prediction)
    })())
}

/// Sleep analysis for one subject (`"a"` or `"b"`).
///
/// # Safety
/// - `engine` must be a valid pointer returned by `cradle_engine_new`.
/// - `subject`, `snapshot` and `now` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `cradle_free_string`.
/// - Returns NULL on error; call `cradle_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cradle_engine_sleep(
    engine: *const CradleEngineHandle,
    subject: *const c_char,
    snapshot: *const c_char,
    now: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    into_cstr((|| {
        let subject = Subject::parse(&required_arg(subject, "subject")?)?;
        let snapshot = Snapshot::parse(&required_arg(snapshot, "snapshot")?)?;
        let analysis = handle
            .engine
            .analyze_sleep(subject, &snapshot.feeds, &snapshot.sleeps, now_arg(now)?);
        to_json(&analysis)
    })())
}

/// Replace the engine's profiles.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `cradle_engine_new`.
/// - `profiles_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `cradle_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cradle_engine_load_profiles(
    engine: *mut CradleEngineHandle,
    profiles_json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    let loaded = required_arg(profiles_json, "profiles JSON").and_then(|json| ProfileSet::from_json(&json));
    match loaded {
        Ok(profiles) => {
            handle.engine.set_profiles(profiles);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Current profiles as JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `cradle_engine_new`.
/// - Returns a newly allocated string that must be freed with `cradle_free_string`.
/// - Returns NULL on error; call `cradle_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn cradle_engine_profiles(engine: *const CradleEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    into_cstr(
        handle
            .engine
            .profiles()
            .to_json()
            .map_err(|e| ComputeError::EncodingError(e.to_string())),
    )
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Cradle functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Cradle function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn cradle_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Cradle function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn cradle_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the engine library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn cradle_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
