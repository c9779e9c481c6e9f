use crate::models::KeyCode;

#[cfg(target_os = "macos")]
mod imp {
    use crate::models::KeyCode;
    use std::ffi::c_void;

    type CFTypeRef = *const c_void;
    type CFDataRef = *const c_void;
    type CFStringRef = *const c_void;
    type TISInputSourceRef = *mut c_void;
    type OSStatus = i32;
    type UniChar = u16;
    type UniCharCount = usize;

    const K_UC_KEY_ACTION_DISPLAY: u16 = 3;
    const K_UC_KEY_TRANSLATE_NO_DEAD_KEYS_MASK: u32 = 1;
    // `shiftKey >> 8` from Events.h
    const SHIFT_MODIFIER_STATE: u32 = 0x0200 >> 8;
    const MAX_CHARS: UniCharCount = 4;

    #[link(name = "Carbon", kind = "framework")]
    extern "C" {
        static kTISPropertyUnicodeKeyLayoutData: CFStringRef;

        fn TISCopyCurrentASCIICapableKeyboardLayoutInputSource() -> TISInputSourceRef;
        fn TISGetInputSourceProperty(source: TISInputSourceRef, key: CFStringRef) -> *mut c_void;
        fn LMGetKbdType() -> u8;
        fn UCKeyTranslate(
            layout: *const c_void,
            virtual_key_code: u16,
            key_action: u16,
            modifier_key_state: u32,
            keyboard_type: u32,
            key_translate_options: u32,
            dead_key_state: *mut u32,
            max_string_length: UniCharCount,
            actual_string_length: *mut UniCharCount,
            unicode_string: *mut UniChar,
        ) -> OSStatus;
    }

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        fn CFDataGetBytePtr(data: CFDataRef) -> *const u8;
        fn CFRelease(cf: CFTypeRef);
    }

    fn translate_with(layout: *const c_void, keycode: KeyCode, modifiers: u32) -> Option<String> {
        let mut chars = [0u16; MAX_CHARS];
        let mut len: UniCharCount = 0;
        let mut dead_key_state: u32 = 0;

        let status = unsafe {
            UCKeyTranslate(
                layout,
                keycode,
                K_UC_KEY_ACTION_DISPLAY,
                modifiers,
                u32::from(LMGetKbdType()),
                K_UC_KEY_TRANSLATE_NO_DEAD_KEYS_MASK,
                &mut dead_key_state,
                MAX_CHARS,
                &mut len,
                chars.as_mut_ptr(),
            )
        };
        if status != 0 || len == 0 {
            return None;
        }

        let s = String::from_utf16_lossy(&chars[..len.min(MAX_CHARS)]);
        if s.chars().all(|c| c.is_control() || c.is_whitespace()) {
            return None;
        }
        Some(s)
    }

    pub(super) fn translate(keycode: KeyCode) -> Option<String> {
        let source = unsafe { TISCopyCurrentASCIICapableKeyboardLayoutInputSource() };
        if source.is_null() {
            return None;
        }

        let result = (|| {
            let data = unsafe { TISGetInputSourceProperty(source, kTISPropertyUnicodeKeyLayoutData) };
            if data.is_null() {
                return None;
            }
            let layout = unsafe { CFDataGetBytePtr(data as CFDataRef) } as *const c_void;
            if layout.is_null() {
                return None;
            }

            let normal = translate_with(layout, keycode, 0)?;
            match translate_with(layout, keycode, SHIFT_MODIFIER_STATE) {
                Some(shifted) if shifted != normal => Some(format!("{}/{}", normal, shifted)),
                _ => Some(normal),
            }
        })();

        // The input source is returned with +1 retain count (Copy rule).
        unsafe { CFRelease(source as CFTypeRef) };
        result
    }
}

#[cfg(not(target_os = "macos"))]
mod imp {
    use crate::models::KeyCode;

    pub(super) fn translate(_keycode: KeyCode) -> Option<String> {
        None
    }
}

/// Label produced by the current ASCII-capable keyboard layout, rendered as
/// `"normal/shifted"` when the shifted character differs.
pub fn translate(keycode: KeyCode) -> Option<String> {
    imp::translate(keycode)
}
