//! CGEventTap on a dedicated run-loop thread
//!
//! The tap is created through the raw CoreGraphics API so system-defined
//! (media key) events can be included in the mask. The callback only
//! decodes the event and hands it to a boxed handler owned by this thread.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::mach_port::{CFMachPort, CFMachPortRef};
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use objc::runtime::{Class, Object};
use objc::{msg_send, sel, sel_impl};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::keys::{decode_system_defined, KeyTransition, SystemKeyEvent};
use super::listener::HotkeyError;
use crate::state::EngineInput;

type CGEventRef = *mut c_void;
type CGEventTapProxy = *mut c_void;

type CGEventTapCallBack = extern "C" fn(
    proxy: CGEventTapProxy,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef;

const KEY_DOWN: u32 = 10;
const KEY_UP: u32 = 11;
const FLAGS_CHANGED: u32 = 12;
const SYSTEM_DEFINED: u32 = 14;
const TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;
const TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFF_FFFF;

const SESSION_EVENT_TAP: u32 = 1;
const HEAD_INSERT_EVENT_TAP: u32 = 0;
const TAP_OPTION_LISTEN_ONLY: u32 = 1;

const KEYBOARD_EVENT_KEYCODE: u32 = 9;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: u32,
        place: u32,
        options: u32,
        events_of_interest: u64,
        callback: CGEventTapCallBack,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
    fn CGEventGetFlags(event: CGEventRef) -> u64;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFMachPortInvalidate(port: CFMachPortRef);
}

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXIsProcessTrusted() -> bool;
}

#[link(name = "AppKit", kind = "framework")]
extern "C" {}

/// Whether this process may observe global key events
pub fn has_accessibility_permission() -> bool {
    // SAFETY: takes no arguments and only reads the trust database.
    unsafe { AXIsProcessTrusted() }
}

/// What the callback reports to the handler
enum TapEvent {
    Key(KeyTransition),
    Disabled,
}

type TapHandler = Box<dyn Fn(TapEvent)>;

/// Handle to a running tap thread
pub(super) struct TapThread {
    run_loop: CFRunLoop,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl TapThread {
    /// Spawn the listener thread and wait until the tap is installed
    pub(super) fn spawn(input_tx: mpsc::Sender<EngineInput>) -> Result<Self, HotkeyError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (startup_tx, startup_rx) = std::sync::mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || run_tap(input_tx, thread_stop, startup_tx))
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match startup_rx.recv() {
            Ok(Ok(run_loop)) => Ok(Self {
                run_loop,
                stop,
                join,
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(HotkeyError::EventTapCreation)
            }
        }
    }

    pub(super) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the run loop and wait for the tap to be torn down
    pub(super) fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.run_loop.stop();
        if self.join.join().is_err() {
            warn!("hotkey listener thread panicked");
        }
    }
}

fn forward(input_tx: &mpsc::Sender<EngineInput>, input: EngineInput) {
    match input_tx.try_send(input) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(input)) => {
            warn!(?input, "engine input channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!("engine input channel closed");
        }
    }
}

fn run_tap(
    input_tx: mpsc::Sender<EngineInput>,
    stop: Arc<AtomicBool>,
    startup_tx: std::sync::mpsc::Sender<Result<CFRunLoop, HotkeyError>>,
) {
    info!("hotkey listener thread started");

    let handler_stop = Arc::clone(&stop);
    let handler: TapHandler = Box::new(move |event| match event {
        TapEvent::Key(transition) => forward(&input_tx, EngineInput::Key(transition)),
        TapEvent::Disabled => {
            warn!("event tap disabled by the system");
            forward(&input_tx, EngineInput::MonitoringLost);
            handler_stop.store(true, Ordering::SeqCst);
        }
    });
    let context = Box::into_raw(Box::new(handler));

    let mask: u64 =
        (1 << KEY_DOWN) | (1 << KEY_UP) | (1 << FLAGS_CHANGED) | (1 << SYSTEM_DEFINED);

    // SAFETY: context stays valid until after the tap is invalidated below.
    let tap = unsafe {
        CGEventTapCreate(
            SESSION_EVENT_TAP,
            HEAD_INSERT_EVENT_TAP,
            TAP_OPTION_LISTEN_ONLY,
            mask,
            tap_callback,
            context.cast(),
        )
    };
    if tap.is_null() {
        // SAFETY: no tap was created, so nothing else references context.
        drop(unsafe { Box::from_raw(context) });
        warn!("failed to create event tap - is Accessibility permission granted?");
        let _ = startup_tx.send(Err(HotkeyError::EventTapCreation));
        return;
    }

    // SAFETY: CGEventTapCreate returns an owned (+1) mach port.
    let port = unsafe { CFMachPort::wrap_under_create_rule(tap) };
    let Ok(source) = port.create_runloop_source(0) else {
        // SAFETY: tap is valid; invalidation stops further callbacks.
        unsafe { CFMachPortInvalidate(tap) };
        drop(port);
        // SAFETY: the tap is invalidated, so the callback can no longer run.
        drop(unsafe { Box::from_raw(context) });
        let _ = startup_tx.send(Err(HotkeyError::RunLoopSource));
        return;
    };

    let run_loop = CFRunLoop::get_current();
    // SAFETY: reading an immutable CoreFoundation constant.
    run_loop.add_source(&source, unsafe { kCFRunLoopCommonModes });
    // SAFETY: tap is a live event tap port.
    unsafe { CGEventTapEnable(tap, true) };

    if startup_tx.send(Ok(run_loop.clone())).is_err() {
        stop.store(true, Ordering::SeqCst);
    }
    info!("event tap created and enabled");

    while !stop.load(Ordering::SeqCst) {
        // SAFETY: reading an immutable CoreFoundation constant.
        let _ = CFRunLoop::run_in_mode(unsafe { kCFRunLoopDefaultMode }, POLL_INTERVAL, true);
    }

    // Tear down in order: no callback may run once the handler is freed
    // SAFETY: tap is still a valid port owned by `port`.
    unsafe {
        CGEventTapEnable(tap, false);
        CFMachPortInvalidate(tap);
    }
    // SAFETY: reading an immutable CoreFoundation constant.
    run_loop.remove_source(&source, unsafe { kCFRunLoopCommonModes });
    drop(source);
    drop(port);
    // SAFETY: the tap is invalidated and removed from the run loop.
    drop(unsafe { Box::from_raw(context) });

    info!("hotkey listener thread stopped");
}

extern "C" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    if user_info.is_null() {
        return event;
    }
    // SAFETY: user_info is the TapHandler box owned by the listener thread,
    // which frees it only after the tap is invalidated.
    let handler = unsafe { &*(user_info as *const TapHandler) };
    // SAFETY: event is the live event passed to this callback.
    if let Some(decoded) = unsafe { decode(event_type, event) } {
        handler(decoded);
    }
    event
}

unsafe fn decode(event_type: u32, event: CGEventRef) -> Option<TapEvent> {
    match event_type {
        TAP_DISABLED_BY_TIMEOUT | TAP_DISABLED_BY_USER_INPUT => Some(TapEvent::Disabled),
        KEY_DOWN | KEY_UP | FLAGS_CHANGED => {
            let keycode = CGEventGetIntegerValueField(event, KEYBOARD_EVENT_KEYCODE) as u16;
            let flags = CGEventGetFlags(event);
            let transition = match event_type {
                KEY_DOWN => KeyTransition::down(keycode),
                KEY_UP => KeyTransition::up(keycode),
                _ => KeyTransition::flags_changed(keycode, flags),
            };
            Some(TapEvent::Key(KeyTransition {
                flags,
                ..transition
            }))
        }
        SYSTEM_DEFINED => system_key(event)
            .map(|key| TapEvent::Key(KeyTransition::system(key.key, key.pressed))),
        _ => None,
    }
}

/// Read subtype and data1 of a system-defined event through NSEvent
unsafe fn system_key(event: CGEventRef) -> Option<SystemKeyEvent> {
    let ns_event_class = Class::get("NSEvent")?;
    let pool_class = Class::get("NSAutoreleasePool")?;

    let pool: *mut Object = msg_send![pool_class, new];
    let ns_event: *mut Object = msg_send![ns_event_class, eventWithCGEvent: event];
    let decoded = if ns_event.is_null() {
        None
    } else {
        let subtype: i16 = msg_send![ns_event, subtype];
        let data1: isize = msg_send![ns_event, data1];
        decode_system_defined(subtype, data1 as i64)
    };
    let _: () = msg_send![pool, drain];

    if let Some(key) = decoded {
        debug!(key = key.key, pressed = key.pressed, "system key");
    }
    decoded
}
