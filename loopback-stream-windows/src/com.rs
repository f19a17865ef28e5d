//! COM apartment scoping for WASAPI calls.

use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::*;

use loopback_stream_core::StreamError;

/// Joins the multithreaded apartment for the lifetime of the guard.
///
/// A thread already initialised as STA is used as-is and left alone on drop.
pub(crate) struct ComApartment {
    owns: bool,
}

impl ComApartment {
    pub(crate) fn enter() -> Result<Self, StreamError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_ok() {
            // S_OK and S_FALSE both need a matching CoUninitialize.
            Ok(Self { owns: true })
        } else if hr == RPC_E_CHANGED_MODE {
            Ok(Self { owns: false })
        } else {
            Err(StreamError::PrimitiveFailure(format!("CoInitializeEx failed: {}", windows::core::Error::from(hr))))
        }
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.owns {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Convert a COM-allocated wide string and free it.
pub(crate) unsafe fn take_pwstr(value: windows::core::PWSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    let text = value.to_string().unwrap_or_default();
    CoTaskMemFree(Some(value.0 as *const _));
    text
}
