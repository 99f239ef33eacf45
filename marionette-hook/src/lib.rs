#![cfg(target_os = "windows")]

mod tracing_helper;

use std::{
    ffi::c_void,
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
    thread,
};

use anyhow::{Context, Result};
use marionette_lib::{create_swap_chain, PresentFn, PresentHook};
use tracing::{error, info, trace};
use windows::{
    core::HRESULT,
    Win32::{
        Foundation::HINSTANCE,
        System::{
            Console::AllocConsole,
            SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH},
        },
        UI::WindowsAndMessaging::GetDesktopWindow,
    },
};

static mut HOOK: Option<PresentHook> = None;
static ORIGINAL_PRESENT: OnceLock<PresentFn> = OnceLock::new();
static FRAME_COUNT: AtomicU64 = AtomicU64::new(0);

unsafe extern "system" fn present_wrapper(
    this: *mut c_void,
    sync_interval: u32,
    flags: u32,
) -> HRESULT {
    let frame = FRAME_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
    if frame == 1 {
        info!("first presented frame observed");
    } else if frame % 1000 == 0 {
        trace!(frame, "presenting");
    }

    // The render thread can reach this wrapper between the slot swap and the
    // trampoline store below; skip that frame instead of faulting.
    let Some(original) = ORIGINAL_PRESENT.get().copied() else {
        return HRESULT(0);
    };
    unsafe { original(this, sync_interval, flags) }
}

fn init() -> Result<()> {
    let swap_chain = create_swap_chain(unsafe { GetDesktopWindow() })
        .context("could not reach the shared swap chain vtable")?;
    let hook = PresentHook::install(swap_chain, present_wrapper)?;
    let _ = ORIGINAL_PRESENT.set(hook.original());
    unsafe { HOOK = Some(hook) };
    info!("present hook active");
    Ok(())
}

#[no_mangle]
pub extern "stdcall" fn DllMain(_inst_dll: HINSTANCE, reason: u32, _reserved: u32) -> bool {
    match reason {
        DLL_PROCESS_ATTACH => {
            if cfg!(debug_assertions) {
                let _ = unsafe { AllocConsole() };
            }
            thread::spawn(|| {
                tracing_helper::init_tracing(".", "marionette.log", cfg!(debug_assertions));
                if let Err(err) = init() {
                    error!("present hook initialization failed: {err:#}");
                }
            });
        }
        DLL_PROCESS_DETACH => unsafe {
            // Dropping the hook state restores the slot and releases the
            // swap chain reference.
            HOOK = None;
        },
        _ => {}
    }
    true
}
