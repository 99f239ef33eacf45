use tracing::warn;
use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// Closes the wrapped handle when dropped, so an early return or a forgotten
/// detach cannot leak it. A close failure is logged rather than propagated;
/// nothing in this crate may take the host process down.
pub struct SafeHandle(pub HANDLE);

impl Drop for SafeHandle {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            warn!("CloseHandle failed: {err}");
        }
    }
}
