//! C Bindings for villas_shmem
//!
//! Lets a host simulator written in another language build an interface,
//! register its signals and fetch the VILLAS node configuration as JSON.

use crate::interface::{Interface, InterfaceOptions};
use crate::signal::AttributeMode;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

// Opaque handle
pub struct VillasInterfaceHandle(Interface);

unsafe fn str_arg<'a>(raw: *const c_char) -> Option<&'a str> {
    if raw.is_null() {
        return None;
    }
    CStr::from_ptr(raw).to_str().ok()
}

/// Create a new interface
///
/// `polling` is non-zero to let consumers poll. Returns null on invalid
/// arguments.
///
/// # Safety
/// Both names must be valid null-terminated strings
#[no_mangle]
pub unsafe extern "C" fn villas_interface_new(
    read_channel: *const c_char,
    write_channel: *const c_char,
    queue_len: usize,
    sample_len: usize,
    polling: c_int,
) -> *mut VillasInterfaceHandle {
    let (Some(read), Some(write)) = (str_arg(read_channel), str_arg(write_channel)) else {
        return ptr::null_mut();
    };

    let options = InterfaceOptions {
        queue_len,
        sample_len,
        polling: polling != 0,
    };

    match Interface::new(read, write, options) {
        Ok(iface) => Box::into_raw(Box::new(VillasInterfaceHandle(iface))),
        Err(e) => {
            tracing::warn!(error = %e, "villas_interface_new failed");
            ptr::null_mut()
        }
    }
}

/// Destroy an interface handle
#[no_mangle]
pub unsafe extern "C" fn villas_interface_free(handle: *mut VillasInterfaceHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Register an exported attribute
///
/// `mode` is 0 (real), 1 (complex real/imag) or 2 (complex mag/phase).
/// Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn villas_interface_export(
    handle: *mut VillasInterfaceHandle,
    attribute: *const c_char,
    idx: usize,
    mode: c_int,
    gain: f64,
) -> c_int {
    register(handle, attribute, mode, |iface, attr, mode| {
        iface.export_attribute(attr, idx, mode, gain)
    })
}

/// Register an imported attribute
///
/// Same conventions as `villas_interface_export`.
#[no_mangle]
pub unsafe extern "C" fn villas_interface_import(
    handle: *mut VillasInterfaceHandle,
    attribute: *const c_char,
    idx: usize,
    mode: c_int,
    gain: f64,
) -> c_int {
    register(handle, attribute, mode, |iface, attr, mode| {
        iface.import_attribute(attr, idx, mode, gain)
    })
}

unsafe fn register<F>(
    handle: *mut VillasInterfaceHandle,
    attribute: *const c_char,
    mode: c_int,
    op: F,
) -> c_int
where
    F: FnOnce(&mut Interface, &str, AttributeMode) -> crate::Result<()>,
{
    if handle.is_null() {
        return -1;
    }
    let Some(attr) = str_arg(attribute) else {
        return -1;
    };
    let Ok(mode) = AttributeMode::try_from(mode) else {
        return -1;
    };

    match op(&mut (*handle).0, attr, mode) {
        Ok(()) => 0,
        Err(e) => {
            tracing::warn!(attribute = attr, error = %e, "attribute registration failed");
            -1
        }
    }
}

/// Get the VILLAS node configuration as JSON
///
/// The returned string must be released with `villas_string_free`. Returns
/// null on error.
#[no_mangle]
pub unsafe extern "C" fn villas_interface_config_json(
    handle: *const VillasInterfaceHandle,
) -> *mut c_char {
    if handle.is_null() {
        return ptr::null_mut();
    }

    let json = match (*handle).0.describe().and_then(|config| config.to_json()) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "describing interface failed");
            return ptr::null_mut();
        }
    };

    match CString::new(json) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Release a string returned by this library
#[no_mangle]
pub unsafe extern "C" fn villas_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_json_through_c_api() {
        let read = CString::new("/sim_in").unwrap();
        let write = CString::new("/sim_out").unwrap();
        let attr = CString::new("v1").unwrap();

        unsafe {
            let handle = villas_interface_new(read.as_ptr(), write.as_ptr(), 1024, 3, 1);
            assert!(!handle.is_null());

            assert_eq!(villas_interface_export(handle, attr.as_ptr(), 0, 0, 1.0), 0);
            assert_eq!(villas_interface_export(handle, attr.as_ptr(), 0, 0, 1.0), -1);
            assert_eq!(villas_interface_export(handle, attr.as_ptr(), 1, 7, 1.0), -1);
            assert_eq!(villas_interface_import(handle, attr.as_ptr(), usize::MAX, 1, 1.0), -1);

            let json = villas_interface_config_json(handle);
            assert!(!json.is_null());
            let value: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(json).to_str().unwrap()).unwrap();
            assert_eq!(value["in"]["signals"], serde_json::json!(["v1"]));
            assert_eq!(value["polling"], serde_json::json!(true));

            villas_string_free(json);
            villas_interface_free(handle);
        }
    }

    #[test]
    fn test_invalid_names_give_null() {
        let bad = CString::new("no_slash").unwrap();
        let good = CString::new("/ok").unwrap();
        unsafe {
            assert!(villas_interface_new(bad.as_ptr(), good.as_ptr(), 1, 1, 0).is_null());
            assert!(villas_interface_new(ptr::null(), good.as_ptr(), 1, 1, 0).is_null());
        }
    }
}
