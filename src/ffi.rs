//! FFI bindings for Stellar Screen
//!
//! This module provides C-compatible functions so a host shell (web view,
//! mobile app) can collect game records and obtain the aggregated payload.
//! All functions use C strings (null-terminated) and return allocated memory
//! that must be freed by the caller using `stellar_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::codec::{to_csv, to_json};
use crate::config::GameConfig;
use crate::error::ScreeningError;
use crate::pipeline::ScreeningSession;
use crate::types::{GameKind, SessionMetrics};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

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

/// Return the string on success, or record the error and return NULL
fn result_to_cstr(result: Result<String, ScreeningError>) -> *mut c_char {
    match result {
        Ok(s) => string_to_cstr(&s),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Resolve difficulty configuration as JSON.
///
/// With a NULL `game` all three configurations are returned as an array.
/// Ages outside 4-17 resolve to the hardest band.
///
/// # Safety
/// - `game` must be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `stellar_free_string`.
/// - Returns NULL on error; call `stellar_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stellar_resolve_config(game: *const c_char, age: i32) -> *mut c_char {
    clear_last_error();

    let result = if game.is_null() {
        serde_json::to_string(&GameConfig::resolve_all(age as i64)).map_err(ScreeningError::from)
    } else {
        let Some(name) = cstr_to_string(game) else {
            set_last_error("Invalid game string pointer");
            return ptr::null_mut();
        };
        name.parse::<GameKind>().and_then(|kind| {
            serde_json::to_string(&GameConfig::resolve(kind, age as i64))
                .map_err(ScreeningError::from)
        })
    };
    result_to_cstr(result)
}

// ============================================================================
// Screening Session API
// ============================================================================

/// Opaque handle to a ScreeningSession
pub struct StellarSessionHandle {
    session: ScreeningSession,
}

/// Start a screening for a child of `age`.
///
/// # Safety
/// - Returns a pointer to a newly allocated session.
/// - Must be freed with `stellar_session_free`.
/// - Returns NULL if the age is outside 4-17; call `stellar_last_error`.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_new(age: i32) -> *mut StellarSessionHandle {
    clear_last_error();

    match ScreeningSession::new(age as i64) {
        Ok(session) => Box::into_raw(Box::new(StellarSessionHandle { session })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `stellar_session_new` or
///   `stellar_session_load`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_free(session: *mut StellarSessionHandle) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Record one finished game (a `SessionMetrics` JSON object).
///
/// # Safety
/// - `session` must be a valid session pointer.
/// - `metrics_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error; call `stellar_last_error` on error.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_record(
    session: *mut StellarSessionHandle,
    metrics_json: *const c_char,
) -> i32 {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &mut *session;

    let Some(json) = cstr_to_string(metrics_json) else {
        set_last_error("Invalid metrics string pointer");
        return -1;
    };

    let result = serde_json::from_str::<SessionMetrics>(&json)
        .map_err(ScreeningError::from)
        .and_then(|metrics| handle.session.record(metrics));
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Whether all three games have been recorded.
///
/// # Safety
/// - `session` must be a valid session pointer.
/// - Returns 1 when complete, 0 when not, -1 on a NULL pointer.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_is_complete(session: *const StellarSessionHandle) -> i32 {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    i32::from((*session).session.is_complete())
}

/// Aggregated feature row as a CSV payload.
///
/// # Safety
/// - `session` must be a valid session pointer.
/// - Returns a newly allocated string that must be freed with `stellar_free_string`.
/// - Returns NULL on error; call `stellar_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_aggregate_csv(
    session: *const StellarSessionHandle,
) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    result_to_cstr(to_csv(&(*session).session.aggregate()))
}

/// Aggregated feature row as a JSON object.
///
/// # Safety
/// - `session` must be a valid session pointer.
/// - Returns a newly allocated string that must be freed with `stellar_free_string`.
/// - Returns NULL on error; call `stellar_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_aggregate_json(
    session: *const StellarSessionHandle,
) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    result_to_cstr(to_json(&(*session).session.aggregate()))
}

/// Serialize a session for later resumption.
///
/// # Safety
/// - `session` must be a valid session pointer.
/// - Returns a newly allocated string that must be freed with `stellar_free_string`.
/// - Returns NULL on error; call `stellar_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_save(session: *const StellarSessionHandle) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    result_to_cstr((*session).session.save())
}

/// Restore a session saved with `stellar_session_save`.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Must be freed with `stellar_session_free`.
/// - Returns NULL on error; call `stellar_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stellar_session_load(json: *const c_char) -> *mut StellarSessionHandle {
    clear_last_error();

    let Some(json) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return ptr::null_mut();
    };
    match ScreeningSession::load(&json) {
        Ok(session) => Box::into_raw(Box::new(StellarSessionHandle { session })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Stellar functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Stellar function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn stellar_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Stellar function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn stellar_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn stellar_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
