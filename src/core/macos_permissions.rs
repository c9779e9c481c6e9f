#[cfg(target_os = "macos")]
mod imp {
    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGPreflightListenEventAccess() -> bool;
        fn CGRequestListenEventAccess() -> bool;
    }

    #[link(name = "IOKit", kind = "framework")]
    extern "C" {
        fn IOHIDCheckAccess(request: u32) -> u32;
    }

    const IOHID_REQUEST_TYPE_LISTEN_EVENT: u32 = 1;
    const IOHID_ACCESS_TYPE_GRANTED: u32 = 0;

    pub(super) fn has_input_monitoring_permission() -> bool {
        // `IOHIDCheckAccess` tends to match what System Settings shows; the CoreGraphics
        // preflight is the older API and covers systems where the former is stale.
        unsafe {
            if IOHIDCheckAccess(IOHID_REQUEST_TYPE_LISTEN_EVENT) == IOHID_ACCESS_TYPE_GRANTED {
                return true;
            }
            CGPreflightListenEventAccess()
        }
    }

    pub(super) fn request_input_monitoring_permission() -> bool {
        unsafe { CGRequestListenEventAccess() }
    }
}

#[cfg(not(target_os = "macos"))]
mod imp {
    pub(super) fn has_input_monitoring_permission() -> bool {
        true
    }

    pub(super) fn request_input_monitoring_permission() -> bool {
        true
    }
}

pub fn has_input_monitoring_permission() -> bool {
    imp::has_input_monitoring_permission()
}

/// Triggers the system prompt (when available) to grant Input Monitoring access.
/// Returns the OS-level API return value; the user may still need to restart the app.
pub fn request_input_monitoring_permission() -> bool {
    imp::request_input_monitoring_permission()
}

/// Checks for Input Monitoring access and prompts once when it is missing.
pub fn ensure_input_monitoring_permission() -> bool {
    let granted = has_input_monitoring_permission() || request_input_monitoring_permission();
    tracing::info!(granted, "input monitoring permission checked");
    granted
}
