use std::{
    ffi::c_void,
    mem::{size_of, transmute},
    sync::atomic::{AtomicUsize, Ordering},
};

use tracing::{debug, warn};
use windows::{
    core::{Interface, HRESULT},
    Win32::{
        Foundation::{E_FAIL, HMODULE, HWND, TRUE},
        Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::{
                D3D11CreateDeviceAndSwapChain, ID3D11Device, D3D11_CREATE_DEVICE_FLAG,
                D3D11_SDK_VERSION,
            },
            Dxgi::{
                Common::{DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_MODE_DESC, DXGI_SAMPLE_DESC},
                IDXGISwapChain, DXGI_SWAP_CHAIN_DESC, DXGI_USAGE_RENDER_TARGET_OUTPUT,
            },
        },
        System::Memory::{VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS},
    },
};

/// `IDXGISwapChain::Present` sits at this index of the interface's virtual
/// dispatch table: three `IUnknown` entries, four `IDXGIObject` entries and
/// `IDXGIDeviceSubObject::GetDevice` come first. The index is a contract
/// with this specific interface version, not a stable ABI; any other
/// presentation interface needs its own derivation.
pub const PRESENT_VTABLE_SLOT: usize = 8;

pub type PresentFn =
    unsafe extern "system" fn(this: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("swap chain creation failed: {0}")]
    ObjectCreationFailed(#[source] windows::core::Error),
    #[error("memory protection change failed: {0}")]
    ProtectionChangeFailed(#[source] windows::core::Error),
}

/// Creates a throwaway device + swap chain whose only purpose is reaching
/// the vtable shared by every swap chain instance in the process.
pub fn create_swap_chain(window: HWND) -> Result<IDXGISwapChain, HookError> {
    let desc = DXGI_SWAP_CHAIN_DESC {
        BufferDesc: DXGI_MODE_DESC {
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ..Default::default()
        },
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 1,
        OutputWindow: window,
        Windowed: TRUE,
        ..Default::default()
    };
    let mut swap_chain: Option<IDXGISwapChain> = None;
    let mut device: Option<ID3D11Device> = None;
    unsafe {
        D3D11CreateDeviceAndSwapChain(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_FLAG(0),
            None,
            D3D11_SDK_VERSION,
            Some(&desc),
            Some(&mut swap_chain),
            Some(&mut device),
            None,
            None,
        )
    }
    .map_err(HookError::ObjectCreationFailed)?;
    swap_chain.ok_or_else(|| HookError::ObjectCreationFailed(E_FAIL.into()))
}

/// One installed Present hook, owned by whoever called
/// [`install`](Self::install). Dropping it removes the patch and releases the
/// swap chain reference, so independent hook lifecycles never share state.
pub struct PresentHook {
    swap_chain: IDXGISwapChain,
    slot: *mut usize,
    original: PresentFn,
    replacement: PresentFn,
    installed: bool,
}

impl PresentHook {
    /// Captures the pointer at the Present slot and overwrites it with
    /// `replacement`. `replacement` must call [`original`](Self::original)
    /// with unchanged arguments and return its result, or the host stops
    /// presenting frames.
    pub fn install(swap_chain: IDXGISwapChain, replacement: PresentFn) -> Result<Self, HookError> {
        let vtable = unsafe { *(swap_chain.as_raw() as *const *mut usize) };
        let slot = unsafe { vtable.add(PRESENT_VTABLE_SLOT) };
        let previous = exchange_slot(slot, replacement as usize)?;
        debug!(slot = ?slot, "present hook installed");
        Ok(Self {
            swap_chain,
            slot,
            original: unsafe { transmute::<usize, PresentFn>(previous) },
            replacement,
            installed: true,
        })
    }

    /// The entry point captured before the swap; the replacement's call
    /// target for passing the frame through.
    pub fn original(&self) -> PresentFn {
        self.original
    }

    pub fn swap_chain(&self) -> &IDXGISwapChain {
        &self.swap_chain
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Writes the saved original pointer back. A no-op when not installed.
    /// On failure the hook stays installed and says so; the caller decides
    /// whether to retry or leak the patch.
    pub fn uninstall(&mut self) -> Result<(), HookError> {
        if !self.installed {
            return Ok(());
        }
        if unsafe { *self.slot } != self.replacement as usize {
            warn!("present slot no longer holds this hook's replacement");
        }
        exchange_slot(self.slot, self.original as usize)?;
        self.installed = false;
        debug!(slot = ?self.slot, "present hook removed");
        Ok(())
    }
}

impl Drop for PresentHook {
    fn drop(&mut self) {
        if let Err(err) = self.uninstall() {
            warn!("present hook left installed on drop: {err}");
        }
    }
}

fn virtual_protect(
    addr: *const c_void,
    size: usize,
    protect: PAGE_PROTECTION_FLAGS,
) -> windows::core::Result<PAGE_PROTECTION_FLAGS> {
    let mut old = PAGE_PROTECTION_FLAGS::default();
    unsafe { VirtualProtect(addr, size, protect, &mut old) }?;
    Ok(old)
}

/// Swaps the word at `slot` for `value` under a temporary protection lift,
/// returning the previous word. The render thread may call through the slot
/// at any moment, so the store must be a single aligned word: readers see
/// the old pointer or the new one, never a torn mix. All-or-nothing: if the
/// protection cannot be restored afterwards, the previous word is put back
/// before the error is returned.
fn exchange_slot(slot: *mut usize, value: usize) -> Result<usize, HookError> {
    let size = size_of::<usize>();
    let old_protect = virtual_protect(slot as *const c_void, size, PAGE_EXECUTE_READWRITE)
        .map_err(HookError::ProtectionChangeFailed)?;
    let slot_word = unsafe { &*(slot as *const AtomicUsize) };
    let previous = slot_word.swap(value, Ordering::SeqCst);
    if let Err(err) = virtual_protect(slot as *const c_void, size, old_protect) {
        slot_word.store(previous, Ordering::SeqCst);
        return Err(HookError::ProtectionChangeFailed(err));
    }
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use windows::core::GUID;

    use super::*;

    unsafe extern "system" fn stub_query_interface(
        _this: *mut c_void,
        _iid: *const GUID,
        _out: *mut *mut c_void,
    ) -> HRESULT {
        HRESULT(0)
    }
    unsafe extern "system" fn stub_add_ref(_this: *mut c_void) -> u32 {
        1
    }
    unsafe extern "system" fn stub_release(_this: *mut c_void) -> u32 {
        0
    }
    unsafe extern "system" fn stub_present(
        _this: *mut c_void,
        _sync_interval: u32,
        _flags: u32,
    ) -> HRESULT {
        HRESULT(0)
    }
    unsafe extern "system" fn replacement_present(
        _this: *mut c_void,
        _sync_interval: u32,
        _flags: u32,
    ) -> HRESULT {
        HRESULT(1)
    }

    /// A minimal COM shape: one leaked vtable with real IUnknown stubs and a
    /// Present entry, and a leaked object pointing at it.
    fn fake_swap_chain() -> (IDXGISwapChain, *mut usize) {
        let vtable: &'static mut [usize; 12] = Box::leak(Box::new([0; 12]));
        vtable[0] = stub_query_interface as usize;
        vtable[1] = stub_add_ref as usize;
        vtable[2] = stub_release as usize;
        vtable[PRESENT_VTABLE_SLOT] = stub_present as usize;
        let vtable_ptr = vtable.as_mut_ptr();
        let object: &'static mut *mut usize = Box::leak(Box::new(vtable_ptr));
        let swap_chain =
            unsafe { IDXGISwapChain::from_raw(object as *mut *mut usize as *mut c_void) };
        (swap_chain, unsafe { vtable_ptr.add(PRESENT_VTABLE_SLOT) })
    }

    #[test]
    fn install_patches_the_slot_and_saves_the_original() {
        let (swap_chain, slot) = fake_swap_chain();
        let hook = PresentHook::install(swap_chain, replacement_present).unwrap();
        assert!(hook.is_installed());
        assert_eq!(unsafe { *slot }, replacement_present as usize);
        assert_eq!(hook.original() as usize, stub_present as usize);
    }

    #[test]
    fn uninstall_restores_the_slot_bit_for_bit() {
        let (swap_chain, slot) = fake_swap_chain();
        let before = unsafe { *slot };
        let mut hook = PresentHook::install(swap_chain, replacement_present).unwrap();
        hook.uninstall().unwrap();
        assert!(!hook.is_installed());
        assert_eq!(unsafe { *slot }, before);

        // Calling it again stays a no-op.
        hook.uninstall().unwrap();
        assert_eq!(unsafe { *slot }, before);
    }

    #[test]
    fn drop_removes_the_patch() {
        let (swap_chain, slot) = fake_swap_chain();
        let before = unsafe { *slot };
        let hook = PresentHook::install(swap_chain, replacement_present).unwrap();
        drop(hook);
        assert_eq!(unsafe { *slot }, before);
    }

    #[test]
    fn exchange_slot_round_trips() {
        let slot: *mut usize = Box::leak(Box::new(0xAAAA_usize));
        let previous = exchange_slot(slot, 0xBBBB).unwrap();
        assert_eq!(previous, 0xAAAA);
        let previous = exchange_slot(slot, previous).unwrap();
        assert_eq!(previous, 0xBBBB);
        assert_eq!(unsafe { *slot }, 0xAAAA);
    }
}
