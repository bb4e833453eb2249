//! NSWorkspace / NSRunningApplication access through the Objective-C runtime

#![allow(non_upper_case_globals)]

use objc::runtime::{Class, Object, BOOL, NO};
use objc::{msg_send, sel, sel_impl};

use super::collaborators::RunningApp;

#[link(name = "AppKit", kind = "framework")]
extern "C" {}

const NSApplicationActivationPolicyRegular: i64 = 0;
const NSApplicationActivateIgnoringOtherApps: u64 = 1 << 1;

unsafe fn ns_string(value: *mut Object) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let utf8: *const std::os::raw::c_char = msg_send![value, UTF8String];
    if utf8.is_null() {
        return None;
    }
    Some(std::ffi::CStr::from_ptr(utf8).to_string_lossy().into_owned())
}

unsafe fn shared_workspace() -> Option<*mut Object> {
    let class = Class::get("NSWorkspace")?;
    let workspace: *mut Object = msg_send![class, sharedWorkspace];
    (!workspace.is_null()).then_some(workspace)
}

unsafe fn describe(app: *mut Object) -> RunningApp {
    let pid: i32 = msg_send![app, processIdentifier];
    let name: *mut Object = msg_send![app, localizedName];
    let bundle_id: *mut Object = msg_send![app, bundleIdentifier];
    RunningApp {
        pid,
        name: ns_string(name).unwrap_or_default(),
        bundle_id: ns_string(bundle_id),
    }
}

unsafe fn running_application(pid: i32) -> Option<*mut Object> {
    let class = Class::get("NSRunningApplication")?;
    let app: *mut Object = msg_send![class, runningApplicationWithProcessIdentifier: pid];
    (!app.is_null()).then_some(app)
}

/// Regular (Dock-visible) running applications
pub fn running_apps() -> Vec<RunningApp> {
    // SAFETY: plain AppKit getters on the shared workspace.
    unsafe {
        let Some(workspace) = shared_workspace() else {
            return Vec::new();
        };
        let apps: *mut Object = msg_send![workspace, runningApplications];
        let count: usize = msg_send![apps, count];

        let mut running = Vec::with_capacity(count);
        for i in 0..count {
            let app: *mut Object = msg_send![apps, objectAtIndex: i];
            let policy: i64 = msg_send![app, activationPolicy];
            if policy == NSApplicationActivationPolicyRegular {
                running.push(describe(app));
            }
        }
        running
    }
}

pub fn frontmost_pid() -> Option<i32> {
    // SAFETY: plain AppKit getters on the shared workspace.
    unsafe {
        let workspace = shared_workspace()?;
        let app: *mut Object = msg_send![workspace, frontmostApplication];
        if app.is_null() {
            return None;
        }
        let pid: i32 = msg_send![app, processIdentifier];
        Some(pid)
    }
}

pub fn activate(pid: i32) -> bool {
    // SAFETY: app is a live NSRunningApplication.
    unsafe {
        let Some(app) = running_application(pid) else {
            return false;
        };
        let ok: BOOL = msg_send![app, activateWithOptions: NSApplicationActivateIgnoringOtherApps];
        ok != NO
    }
}

pub fn hide(pid: i32) -> bool {
    // SAFETY: app is a live NSRunningApplication.
    unsafe {
        let Some(app) = running_application(pid) else {
            return false;
        };
        let ok: BOOL = msg_send![app, hide];
        ok != NO
    }
}
