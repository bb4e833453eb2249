//! macOS window source
//!
//! Enumerates windows through the CoreGraphics window list, correlates them
//! with accessibility window elements, and focuses them through SkyLight so
//! windows on other Spaces or in full screen can be raised.
//!
//! Requires Accessibility permission. Window titles additionally require
//! Screen Recording permission on macOS 10.15+.

#![allow(non_upper_case_globals)]

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFType, CFTypeRef, TCFType};
use core_foundation::data::CFData;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::CFNumber;
use core_foundation::string::{CFString, CFStringRef};
use core_graphics::window::{
    copy_window_info, kCGNullWindowID, kCGWindowLayer, kCGWindowListExcludeDesktopElements,
    kCGWindowListOptionOnScreenOnly, kCGWindowName, kCGWindowNumber, kCGWindowOwnerName,
    kCGWindowOwnerPID,
};
use tracing::{debug, trace, warn};

use super::cache::{
    FocusableWindow, HandleDiscovery, MemoizedDiscovery, ProcessDescriptor, WindowError,
    WindowHandle, WindowSource,
};

type AXUIElementRef = *const c_void;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct ProcessSerialNumber {
    high: u32,
    low: u32,
}

const kAXErrorSuccess: i32 = 0;
const kCPSUserGenerated: u32 = 0x200;

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXUIElementCreateApplication(pid: i32) -> AXUIElementRef;
    fn AXUIElementCopyAttributeValue(
        element: AXUIElementRef,
        attribute: CFStringRef,
        value: *mut CFTypeRef,
    ) -> i32;
    fn AXUIElementPerformAction(element: AXUIElementRef, action: CFStringRef) -> i32;
    fn _AXUIElementGetWindow(element: AXUIElementRef, window_id: *mut u32) -> i32;
    fn _AXUIElementCreateWithRemoteToken(token: *const c_void) -> AXUIElementRef;
    fn GetProcessForPID(pid: i32, psn: *mut ProcessSerialNumber) -> i32;
}

#[link(name = "SkyLight", kind = "framework")]
extern "C" {
    fn _SLPSSetFrontProcessWithOptions(psn: *const ProcessSerialNumber, wid: u32, mode: u32) -> i32;
    fn SLPSPostEventRecordTo(psn: *const ProcessSerialNumber, bytes: *const u8) -> i32;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFRelease(cf: *const c_void);
    fn CFRetain(cf: *const c_void) -> *const c_void;
}

/// Retained accessibility element; released on drop
#[derive(Debug)]
struct AxElement(AXUIElementRef);

// SAFETY: AXUIElement references are CF objects and may be used from any thread.
unsafe impl Send for AxElement {}
unsafe impl Sync for AxElement {}

impl AxElement {
    /// Take ownership of an element returned by a Create/Copy function
    fn from_create(ptr: AXUIElementRef) -> Option<Self> {
        (!ptr.is_null()).then_some(Self(ptr))
    }

    /// Retain a borrowed element
    fn from_get(ptr: AXUIElementRef) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: ptr is a live CF object borrowed from its container.
        Some(Self(unsafe { CFRetain(ptr) }))
    }

    fn copy_attribute(&self, attribute: &str) -> Option<CFType> {
        let name = CFString::new(attribute);
        let mut value: CFTypeRef = std::ptr::null();
        // SAFETY: self.0 is a retained AXUIElement; value follows the Copy rule.
        let err = unsafe {
            AXUIElementCopyAttributeValue(self.0, name.as_concrete_TypeRef(), &mut value)
        };
        if err != kAXErrorSuccess || value.is_null() {
            return None;
        }
        // SAFETY: value was returned under the Copy rule.
        Some(unsafe { CFType::wrap_under_create_rule(value) })
    }

    fn window_id(&self) -> Option<u32> {
        let mut id = 0u32;
        // SAFETY: private but stable accessor; writes a CGWindowID.
        let err = unsafe { _AXUIElementGetWindow(self.0, &mut id) };
        (err == kAXErrorSuccess && id != 0).then_some(id)
    }

    fn raise(&self) -> bool {
        let action = CFString::new("AXRaise");
        // SAFETY: self.0 is a retained AXUIElement.
        unsafe { AXUIElementPerformAction(self.0, action.as_concrete_TypeRef()) == kAXErrorSuccess }
    }

    fn is_window(&self) -> bool {
        self.copy_attribute("AXRole")
            .and_then(|v| v.downcast::<CFString>())
            .map(|role| role.to_string() == "AXWindow")
            .unwrap_or(false)
    }
}

impl Drop for AxElement {
    fn drop(&mut self) {
        // SAFETY: we own one retain count.
        unsafe { CFRelease(self.0) }
    }
}

/// Window source backed by CoreGraphics, Accessibility and SkyLight
pub struct MacWindowSource {
    discovery: Box<dyn HandleDiscovery>,
}

impl MacWindowSource {
    pub fn new(discovery: Box<dyn HandleDiscovery>) -> Self {
        Self { discovery }
    }

    /// Accessibility windows of `pid` keyed by CGWindowID
    fn ax_windows(pid: i32) -> HashMap<u32, WindowHandle> {
        let mut handles = HashMap::new();
        // SAFETY: returns an owned element or null.
        let Some(app) = AxElement::from_create(unsafe { AXUIElementCreateApplication(pid) }) else {
            return handles;
        };
        let Some(windows) = app.copy_attribute("AXWindows") else {
            return handles;
        };
        // SAFETY: the AXWindows attribute is a CFArray of AXUIElements.
        let windows: CFArray<*const c_void> =
            unsafe { CFArray::wrap_under_get_rule(windows.as_CFTypeRef() as CFArrayRef) };
        for item in windows.iter() {
            if let Some(element) = AxElement::from_get(*item) {
                if let Some(id) = element.window_id() {
                    handles.insert(id, WindowHandle::with_native(id, pid, element));
                }
            }
        }
        handles
    }
}

impl Default for MacWindowSource {
    fn default() -> Self {
        Self::new(Box::new(MemoizedDiscovery::new(RemoteTokenDiscovery::default())))
    }
}

struct ListedWindow {
    window_id: u32,
    pid: i32,
    owner: String,
    title: String,
}

fn dict_number(dict: &CFDictionary<CFString, CFType>, key: CFStringRef) -> Option<i64> {
    // SAFETY: key is a static CFString exported by CoreGraphics.
    let key = unsafe { CFString::wrap_under_get_rule(key) };
    dict.find(&key)
        .and_then(|v| v.downcast::<CFNumber>())
        .and_then(|n| n.to_i64())
}

fn dict_string(dict: &CFDictionary<CFString, CFType>, key: CFStringRef) -> Option<String> {
    // SAFETY: key is a static CFString exported by CoreGraphics.
    let key = unsafe { CFString::wrap_under_get_rule(key) };
    dict.find(&key)
        .and_then(|v| v.downcast::<CFString>())
        .map(|s| s.to_string())
}

/// On-screen, layer-0, titled windows in front-to-back order
fn list_on_screen_windows() -> Result<Vec<ListedWindow>, WindowError> {
    let info = copy_window_info(
        kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements,
        kCGNullWindowID,
    )
    .ok_or_else(|| WindowError::Enumeration("CGWindowListCopyWindowInfo returned null".into()))?;

    let mut listed = Vec::new();
    for item in info.iter() {
        // SAFETY: every element of the window list is a CFDictionary.
        let dict: CFDictionary<CFString, CFType> =
            unsafe { CFDictionary::wrap_under_get_rule(*item as CFDictionaryRef) };

        if dict_number(&dict, unsafe { kCGWindowLayer }) != Some(0) {
            continue;
        }
        let title = dict_string(&dict, unsafe { kCGWindowName }).unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        let (Some(window_id), Some(pid)) = (
            dict_number(&dict, unsafe { kCGWindowNumber }),
            dict_number(&dict, unsafe { kCGWindowOwnerPID }),
        ) else {
            continue;
        };

        listed.push(ListedWindow {
            window_id: window_id as u32,
            pid: pid as i32,
            owner: dict_string(&dict, unsafe { kCGWindowOwnerName }).unwrap_or_default(),
            title,
        });
    }
    Ok(listed)
}

impl WindowSource for MacWindowSource {
    fn enumerate(&self) -> Result<Vec<FocusableWindow>, WindowError> {
        let listed = list_on_screen_windows()?;

        let mut by_pid: HashMap<i32, HashMap<u32, WindowHandle>> = HashMap::new();
        let mut pids_missing = HashSet::new();
        for pid in listed.iter().map(|w| w.pid).collect::<HashSet<_>>() {
            let mut handles = Self::ax_windows(pid);
            let missing: Vec<u32> = listed
                .iter()
                .filter(|w| w.pid == pid && !handles.contains_key(&w.window_id))
                .map(|w| w.window_id)
                .collect();
            if !missing.is_empty() {
                pids_missing.insert(pid);
                for handle in self.discovery.discover(pid, &missing) {
                    handles.insert(handle.window_id, handle);
                }
            }
            by_pid.insert(pid, handles);
        }
        self.discovery.retain_pids(&pids_missing);

        let windows: Vec<FocusableWindow> = listed
            .into_iter()
            .map(|w| {
                let handle = by_pid
                    .get(&w.pid)
                    .and_then(|h| h.get(&w.window_id))
                    .cloned()
                    .unwrap_or_else(|| WindowHandle::new(w.window_id, w.pid));
                FocusableWindow {
                    window_id: w.window_id,
                    pid: w.pid,
                    app_name: w.owner.clone(),
                    title: w.title,
                    handle,
                    process: ProcessDescriptor {
                        pid: w.pid,
                        name: w.owner,
                        bundle_id: None,
                    },
                }
            })
            .collect();

        trace!(count = windows.len(), "enumerated on-screen windows");
        Ok(windows)
    }

    fn focus(&self, handle: &WindowHandle) -> Result<(), WindowError> {
        let mut psn = ProcessSerialNumber::default();
        // SAFETY: psn is a valid out-pointer.
        if unsafe { GetProcessForPID(handle.pid, &mut psn) } != 0 {
            return Err(WindowError::Gone(handle.window_id));
        }

        // SAFETY: psn was filled in by GetProcessForPID.
        let err = unsafe { _SLPSSetFrontProcessWithOptions(&psn, handle.window_id, kCPSUserGenerated) };
        if err != 0 {
            return Err(WindowError::Focus {
                window_id: handle.window_id,
                reason: format!("SLPSSetFrontProcessWithOptions error {err}"),
            });
        }
        make_key_window(&psn, handle.window_id);

        match handle.native::<AxElement>() {
            Some(element) if element.raise() => {}
            Some(_) => debug!(window_id = handle.window_id, "AXRaise failed, window fronted only"),
            None => debug!(window_id = handle.window_id, "no accessibility element for window"),
        }
        Ok(())
    }
}

/// Post the synthetic event records that make `window_id` the key window
fn make_key_window(psn: &ProcessSerialNumber, window_id: u32) {
    let mut bytes = [0u8; 0xf8];
    bytes[0x04] = 0xf8;
    bytes[0x3a] = 0x10;
    bytes[0x3c..0x40].copy_from_slice(&window_id.to_le_bytes());
    bytes[0x20..0x30].fill(0xff);

    bytes[0x08] = 0x01;
    // SAFETY: bytes is a 0xf8-byte event record as SkyLight expects.
    unsafe { SLPSPostEventRecordTo(psn, bytes.as_ptr()) };
    bytes[0x08] = 0x02;
    // SAFETY: as above.
    unsafe { SLPSPostEventRecordTo(psn, bytes.as_ptr()) };
}

/// Brute-force discovery through remote accessibility tokens.
///
/// Windows on other Spaces are often missing from `AXWindows`. Elements can
/// still be materialised from a token of `pid`, a magic marker and a small
/// element id; candidates whose CGWindowID matches are kept.
pub struct RemoteTokenDiscovery {
    max_element_id: u64,
}

impl Default for RemoteTokenDiscovery {
    fn default() -> Self {
        Self { max_element_id: 1000 }
    }
}

impl HandleDiscovery for RemoteTokenDiscovery {
    fn discover(&self, pid: i32, window_ids: &[u32]) -> Vec<WindowHandle> {
        let mut wanted: HashSet<u32> = window_ids.iter().copied().collect();
        let mut found = Vec::new();

        let mut token = [0u8; 20];
        token[0..4].copy_from_slice(&pid.to_le_bytes());
        token[8..12].copy_from_slice(&0x636f_636fu32.to_le_bytes());

        for element_id in 0..self.max_element_id {
            if wanted.is_empty() {
                break;
            }
            token[12..20].copy_from_slice(&element_id.to_le_bytes());
            let data = CFData::from_buffer(&token);
            // SAFETY: returns an owned element or null.
            let ptr = unsafe { _AXUIElementCreateWithRemoteToken(data.as_concrete_TypeRef() as *const c_void) };
            let Some(element) = AxElement::from_create(ptr) else {
                continue;
            };
            if !element.is_window() {
                continue;
            }
            if let Some(id) = element.window_id() {
                if wanted.remove(&id) {
                    found.push(WindowHandle::with_native(id, pid, element));
                }
            }
        }

        if !wanted.is_empty() {
            warn!(pid, missing = wanted.len(), "windows without accessibility handles");
        }
        found
    }
}
