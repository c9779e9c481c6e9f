use crate::models::RawKeyEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Sender, SyncSender};
use std::sync::Arc;

/// Control side of a running tap, owned by the caller of [`run`].
pub struct TapHandle {
    stop: Arc<AtomicBool>,
    run_loop: imp::RunLoopHandle,
}

impl TapHandle {
    /// Asks the run loop to exit. Returns immediately; join the listener thread to wait.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        imp::wake(&self.run_loop);
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use super::{AtomicBool, AtomicU64, Ordering, RawKeyEvent, Sender, SyncSender, TapHandle};
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::mpsc::TrySendError;
    use std::sync::Arc;

    type CFIndex = isize;
    type CFAllocatorRef = *const c_void;
    type CFRunLoopRef = *mut c_void;
    type CFRunLoopSourceRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CFMachPortRef = *mut c_void;
    type CFTypeRef = *const c_void;
    type CFTimeInterval = f64;

    type CGEventTapProxy = *mut c_void;
    type CGEventRef = *mut c_void;
    type CGEventType = u32;
    type CGEventMask = u64;
    type CGEventField = i32;
    type CGEventFlags = u64;

    type CGEventTapLocation = u32;
    type CGEventTapPlacement = u32;
    type CGEventTapOptions = u32;

    const K_CG_SESSION_EVENT_TAP: CGEventTapLocation = 1;
    const K_CG_HEAD_INSERT_EVENT_TAP: CGEventTapPlacement = 0;
    const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: CGEventTapOptions = 1;

    const K_CG_EVENT_KEY_DOWN: CGEventType = 10;
    const K_CG_EVENT_FLAGS_CHANGED: CGEventType = 12;

    const K_CG_EVENT_TAP_DISABLED_BY_TIMEOUT: CGEventType = u32::MAX - 1; // -2
    const K_CG_EVENT_TAP_DISABLED_BY_USER_INPUT: CGEventType = u32::MAX - 2; // -3

    // CoreGraphics constant: kCGKeyboardEventKeycode
    const K_CG_KEYBOARD_EVENT_KEYCODE: CGEventField = 9;

    const RUN_LOOP_SLICE: CFTimeInterval = 0.25;

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGEventTapCreate(
            tap: CGEventTapLocation,
            place: CGEventTapPlacement,
            options: CGEventTapOptions,
            events_of_interest: CGEventMask,
            callback: extern "C" fn(CGEventTapProxy, CGEventType, CGEventRef, *mut c_void) -> CGEventRef,
            user_info: *mut c_void,
        ) -> CFMachPortRef;

        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

        fn CGEventGetIntegerValueField(event: CGEventRef, field: CGEventField) -> i64;

        fn CGEventGetFlags(event: CGEventRef) -> CGEventFlags;
    }

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        static kCFRunLoopCommonModes: CFStringRef;
        static kCFRunLoopDefaultMode: CFStringRef;

        fn CFMachPortCreateRunLoopSource(
            allocator: CFAllocatorRef,
            port: CFMachPortRef,
            order: CFIndex,
        ) -> CFRunLoopSourceRef;
        fn CFMachPortInvalidate(port: CFMachPortRef);

        fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRemoveSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRunInMode(
            mode: CFStringRef,
            seconds: CFTimeInterval,
            return_after_source_handled: u8,
        ) -> i32;
        fn CFRunLoopStop(rl: CFRunLoopRef);
        fn CFRetain(cf: CFTypeRef) -> CFTypeRef;
        fn CFRelease(cf: CFTypeRef);
    }

    /// Retained reference to the listener thread's run loop.
    pub(crate) struct RunLoopHandle(CFRunLoopRef);

    // CFRunLoopStop is documented as safe to call from any thread.
    unsafe impl Send for RunLoopHandle {}
    unsafe impl Sync for RunLoopHandle {}

    impl Drop for RunLoopHandle {
        fn drop(&mut self) {
            unsafe { CFRelease(self.0 as CFTypeRef) };
        }
    }

    pub(crate) fn wake(run_loop: &RunLoopHandle) {
        unsafe { CFRunLoopStop(run_loop.0) };
    }

    struct CallbackCtx {
        tx: SyncSender<RawKeyEvent>,
        dropped: Arc<AtomicU64>,
        tap: CFMachPortRef,
    }

    extern "C" fn tap_callback(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        event: CGEventRef,
        user_info: *mut c_void,
    ) -> CGEventRef {
        // Never unwind across FFI.
        let _ = std::panic::catch_unwind(|| {
            if user_info.is_null() {
                return;
            }
            let ctx = unsafe { &*(user_info as *const CallbackCtx) };

            if event_type == K_CG_EVENT_TAP_DISABLED_BY_TIMEOUT
                || event_type == K_CG_EVENT_TAP_DISABLED_BY_USER_INPUT
            {
                if !ctx.tap.is_null() {
                    unsafe { CGEventTapEnable(ctx.tap, true) };
                }
                return;
            }

            let keycode =
                unsafe { CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_KEYCODE) } as u16;
            let ev = match event_type {
                K_CG_EVENT_KEY_DOWN => RawKeyEvent::KeyDown { keycode },
                K_CG_EVENT_FLAGS_CHANGED => RawKeyEvent::FlagsChanged {
                    keycode,
                    flags: unsafe { CGEventGetFlags(event) },
                },
                _ => return,
            };

            if let Err(TrySendError::Full(_)) = ctx.tx.try_send(ev) {
                ctx.dropped.fetch_add(1, Ordering::Relaxed);
            }
        });

        event
    }

    fn mask_for(types: &[CGEventType]) -> CGEventMask {
        let mut mask: CGEventMask = 0;
        for &t in types {
            mask |= 1u64 << t;
        }
        mask
    }

    pub(crate) fn run(
        tx: SyncSender<RawKeyEvent>,
        dropped: Arc<AtomicU64>,
        ready: Sender<Result<TapHandle, String>>,
    ) {
        let ctx_ptr = Box::into_raw(Box::new(CallbackCtx {
            tx,
            dropped,
            tap: ptr::null_mut(),
        }));

        let events = mask_for(&[K_CG_EVENT_KEY_DOWN, K_CG_EVENT_FLAGS_CHANGED]);
        let tap = unsafe {
            CGEventTapCreate(
                K_CG_SESSION_EVENT_TAP,
                K_CG_HEAD_INSERT_EVENT_TAP,
                K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
                events,
                tap_callback,
                ctx_ptr as *mut c_void,
            )
        };

        if tap.is_null() {
            // Safety: the tap was never created, so no callback holds the pointer.
            drop(unsafe { Box::from_raw(ctx_ptr) });
            let _ = ready.send(Err(
                "CGEventTapCreate returned null (permission missing or event tap unavailable)"
                    .to_string(),
            ));
            return;
        }

        // Safety: callbacks only run on this thread's run loop, which has not started yet.
        unsafe { (*ctx_ptr).tap = tap };

        let run_loop = unsafe { CFRunLoopGetCurrent() };
        let source = unsafe { CFMachPortCreateRunLoopSource(ptr::null(), tap, 0) };
        if run_loop.is_null() || source.is_null() {
            unsafe {
                CFMachPortInvalidate(tap);
                CFRelease(tap as CFTypeRef);
                drop(Box::from_raw(ctx_ptr));
            }
            let _ = ready.send(Err("failed to attach event tap to a run loop".to_string()));
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = TapHandle {
            stop: Arc::clone(&stop),
            run_loop: RunLoopHandle(unsafe { CFRetain(run_loop as CFTypeRef) } as CFRunLoopRef),
        };

        unsafe {
            CFRunLoopAddSource(run_loop, source, kCFRunLoopCommonModes);
            CGEventTapEnable(tap, true);
        }

        if ready.send(Ok(handle)).is_err() {
            stop.store(true, Ordering::SeqCst);
        }

        // Run in slices so a stop request that lands before the loop starts is still seen.
        while !stop.load(Ordering::SeqCst) {
            unsafe { CFRunLoopRunInMode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, 0) };
        }

        unsafe {
            CGEventTapEnable(tap, false);
            CFRunLoopRemoveSource(run_loop, source, kCFRunLoopCommonModes);
            CFMachPortInvalidate(tap);
            CFRelease(source as CFTypeRef);
            CFRelease(tap as CFTypeRef);
            // Safety: the tap is invalidated and its source removed from the only run loop
            // that dispatched callbacks, so nothing references the context anymore.
            drop(Box::from_raw(ctx_ptr));
        }
    }
}

#[cfg(not(target_os = "macos"))]
mod imp {
    use super::{AtomicU64, RawKeyEvent, Sender, SyncSender, TapHandle};
    use std::sync::Arc;

    pub(crate) struct RunLoopHandle;

    pub(crate) fn wake(_run_loop: &RunLoopHandle) {}

    pub(crate) fn run(
        _tx: SyncSender<RawKeyEvent>,
        _dropped: Arc<AtomicU64>,
        ready: Sender<Result<TapHandle, String>>,
    ) {
        let _ = ready.send(Err(
            "macOS event tap is not supported on this platform".to_string()
        ));
    }
}

/// Installs a listen-only tap for key-down and flags-changed events and runs its run loop
/// on the calling thread until [`TapHandle::stop`] is called.
///
/// The outcome of tap creation is reported once through `ready`. Raw events are pushed to
/// `tx` without blocking; events that do not fit in the queue are counted in `dropped`.
/// `tx` is dropped when this function returns.
pub fn run(
    tx: SyncSender<RawKeyEvent>,
    dropped: Arc<AtomicU64>,
    ready: Sender<Result<TapHandle, String>>,
) {
    imp::run(tx, dropped, ready)
}
