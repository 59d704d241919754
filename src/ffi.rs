//! FFI bindings for Synheart Coach
//!
//! This module provides C-compatible functions for calling the coach from other
//! languages. Inputs and outputs are JSON in null-terminated C strings. Returned
//! strings are allocated here and must be freed with `coach_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::config::CoachConfig;
use crate::error::CoachError;
use crate::normalizer::SignalNormalizer;
use crate::orchestrator::Orchestrator;
use crate::session::FeedbackKind;
use crate::stage::StageIndicators;
use crate::types::RawSignalInput;

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

/// Serialize a result to an owned C string, recording failures as the last error
fn respond<T: Serialize>(result: Result<T, CoachError>) -> *mut c_char {
    match result.and_then(|value| serde_json::to_string(&value).map_err(CoachError::from)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Normalize a single raw signal JSON object and return the normalize result.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `coach_free_string`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_normalize_signal(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    respond(
        serde_json::from_str::<RawSignalInput>(&json_str)
            .map_err(CoachError::from)
            .map(|raw| SignalNormalizer::normalize(&raw)),
    )
}

// ============================================================================
// Orchestrator API
// ============================================================================

/// Opaque handle to an Orchestrator
pub struct CoachHandle {
    orchestrator: Orchestrator,
}

/// Create and initialize an orchestrator.
///
/// Configuration comes from `COACH_*` environment variables; a positive
/// `trajectory_window_days` overrides the window. Windows beyond ten years
/// fall back to the default.
///
/// # Safety
/// - Returns a pointer to a newly allocated orchestrator.
/// - Must be freed with `coach_orchestrator_free`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_orchestrator_new(trajectory_window_days: i32) -> *mut CoachHandle {
    clear_last_error();

    let mut config = CoachConfig::from_env();
    if trajectory_window_days > 0 {
        config = config.with_trajectory_window_days(trajectory_window_days as u32);
    }

    let orchestrator = Orchestrator::from_config(config);
    if let Err(e) = orchestrator.initialize() {
        set_last_error(&e.to_string());
        return ptr::null_mut();
    }

    Box::into_raw(Box::new(CoachHandle { orchestrator }))
}

/// Free an orchestrator.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn coach_orchestrator_free(handle: *mut CoachHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Resolve the handle and user id shared by every orchestrator call
unsafe fn session_args<'a>(
    handle: *const CoachHandle,
    user_id: *const c_char,
) -> Option<(&'a Orchestrator, String)> {
    if handle.is_null() {
        set_last_error("Null orchestrator pointer");
        return None;
    }
    match cstr_to_string(user_id) {
        Some(user) => Some((&(*handle).orchestrator, user)),
        None => {
            set_last_error("Invalid user_id string pointer");
            None
        }
    }
}

/// Ingest a JSON array of raw signals for a user.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - `user_id` and `signals_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `coach_free_string`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_process_signals(
    handle: *const CoachHandle,
    user_id: *const c_char,
    signals_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((orchestrator, user)) = session_args(handle, user_id) else {
        return ptr::null_mut();
    };
    let json_str = match cstr_to_string(signals_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    respond(
        serde_json::from_str::<Vec<RawSignalInput>>(&json_str)
            .map_err(CoachError::from)
            .and_then(|signals| orchestrator.process_signals(&user, &signals)),
    )
}

/// Assess the user's stage and generate recommendations.
///
/// `indicators_json` may be NULL to assess from the trajectory alone. The
/// result is the JSON `null` when the user has no trajectory yet.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - `user_id` must be a valid null-terminated C string; `indicators_json` must
///   be one or NULL.
/// - Returns a newly allocated string that must be freed with `coach_free_string`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_generate_intervention(
    handle: *const CoachHandle,
    user_id: *const c_char,
    indicators_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((orchestrator, user)) = session_args(handle, user_id) else {
        return ptr::null_mut();
    };
    let indicators = match cstr_to_string(indicators_json) {
        Some(json) => match serde_json::from_str::<StageIndicators>(&json) {
            Ok(indicators) => Some(indicators),
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        },
        None => None,
    };

    respond(orchestrator.generate_intervention(&user, indicators.as_ref()))
}

/// Create and activate an execution plan starting today.
///
/// The result is the JSON `null` when no plan could be built.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - `user_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `coach_free_string`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_activate_plan(
    handle: *const CoachHandle,
    user_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((orchestrator, user)) = session_args(handle, user_id) else {
        return ptr::null_mut();
    };
    respond(orchestrator.activate_intervention_plan(&user, None))
}

/// Submit a feedback JSON object (tagged by `type`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - `user_id` and `feedback_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `coach_free_string`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_process_feedback(
    handle: *const CoachHandle,
    user_id: *const c_char,
    feedback_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((orchestrator, user)) = session_args(handle, user_id) else {
        return ptr::null_mut();
    };
    let json_str = match cstr_to_string(feedback_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    respond(
        serde_json::from_str::<FeedbackKind>(&json_str)
            .map_err(CoachError::from)
            .and_then(|feedback| orchestrator.process_feedback(&user, feedback)),
    )
}

/// Dashboard projection for a user.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - `user_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `coach_free_string`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_dashboard(
    handle: *const CoachHandle,
    user_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((orchestrator, user)) = session_args(handle, user_id) else {
        return ptr::null_mut();
    };
    respond(orchestrator.get_dashboard(&user))
}

/// Conversation context for a user.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - `user_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `coach_free_string`.
/// - Returns NULL on error; call `coach_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn coach_conversation_context(
    handle: *const CoachHandle,
    user_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some((orchestrator, user)) = session_args(handle, user_id) else {
        return ptr::null_mut();
    };
    respond(orchestrator.get_conversation_context(&user))
}

/// Remove sessions idle longer than `max_age_hours`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `coach_orchestrator_new`.
/// - Returns the number of removed sessions, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn coach_cleanup_sessions(
    handle: *const CoachHandle,
    max_age_hours: i64,
) -> i64 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null orchestrator pointer");
        return -1;
    }

    match (*handle).orchestrator.cleanup_sessions(max_age_hours) {
        Ok(removed) => removed as i64,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by coach functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a coach function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn coach_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next coach function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn coach_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the coach library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn coach_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
