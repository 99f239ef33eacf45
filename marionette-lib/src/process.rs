use std::ffi::c_void;

use tracing::{debug, warn};
use windows::Win32::{
    Foundation::{ERROR_ACCESS_DENIED, FALSE},
    System::{
        Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory},
        Threading::{
            IsWow64Process, OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
            PROCESS_VM_READ, PROCESS_VM_WRITE,
        },
    },
};

use crate::{find_process_id::find_process_id, win_api_wrappers::SafeHandle};

/// Pointer width of the attached process, probed via WOW64 introspection at
/// attach time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
    /// The probe itself failed and 32-bit was assumed. Low confidence.
    AssumedBits32,
}

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("process not found")]
    NotFound,
    #[error("access denied opening process: {0}")]
    AccessDenied(#[source] windows::core::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("not attached to a process")]
    InvalidState,
    #[error("memory transfer failed: {0}")]
    Transfer(#[source] windows::core::Error),
    #[error("transferred {transferred} of {requested} bytes")]
    PartialTransfer { requested: usize, transferred: usize },
}

/// Owns the handle to another process and is the only sanctioned path for
/// touching its memory. Move-only: the handle closes on `detach` or drop.
pub struct ExternalProcess {
    handle: Option<SafeHandle>,
    process_id: u32,
    pointer_width: Option<PointerWidth>,
}

impl ExternalProcess {
    /// Looks up `exe_file` among running processes and attaches to the first
    /// match.
    pub fn attach(exe_file: &str) -> Result<Self, AttachError> {
        Self::attach_pid(find_process_id(exe_file)?)
    }

    /// Opens `process_id` with query and VM read/write/operation rights only,
    /// then probes its pointer width.
    pub fn attach_pid(process_id: u32) -> Result<Self, AttachError> {
        let handle = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION
                    | PROCESS_VM_OPERATION
                    | PROCESS_VM_READ
                    | PROCESS_VM_WRITE,
                FALSE,
                process_id,
            )
        }
        .map_err(|err| {
            if err.code() == ERROR_ACCESS_DENIED.to_hresult() {
                AttachError::AccessDenied(err)
            } else {
                AttachError::NotFound
            }
        })?;
        let handle = SafeHandle(handle);
        let pointer_width = probe_pointer_width(&handle);
        debug!(process_id, ?pointer_width, "attached");

        Ok(Self {
            handle: Some(handle),
            process_id,
            pointer_width: Some(pointer_width),
        })
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// `None` once detached.
    pub fn pointer_width(&self) -> Option<PointerWidth> {
        self.pointer_width
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    /// Releases the handle. Safe to call repeatedly or on an instance that
    /// was never attached.
    pub fn detach(&mut self) {
        if self.handle.take().is_some() {
            debug!(process_id = self.process_id, "detached");
        }
        self.process_id = 0;
        self.pointer_width = None;
    }

    /// Fills `buffer` from `address` in the target. Either the whole buffer
    /// is transferred or an error is returned; on error the buffer contents
    /// are unspecified.
    pub fn read(&self, address: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        let handle = self.handle.as_ref().ok_or(MemoryError::InvalidState)?;
        let mut number_of_bytes_read = 0;
        unsafe {
            ReadProcessMemory(
                handle.0,
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                Some(&mut number_of_bytes_read),
            )
        }
        .map_err(MemoryError::Transfer)?;
        if number_of_bytes_read != buffer.len() {
            return Err(MemoryError::PartialTransfer {
                requested: buffer.len(),
                transferred: number_of_bytes_read,
            });
        }
        Ok(())
    }

    /// Copies `buffer` to `address` in the target, with the same
    /// all-or-nothing contract as [`read`](Self::read).
    pub fn write(&self, address: usize, buffer: &[u8]) -> Result<(), MemoryError> {
        let handle = self.handle.as_ref().ok_or(MemoryError::InvalidState)?;
        let mut number_of_bytes_written = 0;
        unsafe {
            WriteProcessMemory(
                handle.0,
                address as *const c_void,
                buffer.as_ptr() as *const c_void,
                buffer.len(),
                Some(&mut number_of_bytes_written),
            )
        }
        .map_err(MemoryError::Transfer)?;
        if number_of_bytes_written != buffer.len() {
            return Err(MemoryError::PartialTransfer {
                requested: buffer.len(),
                transferred: number_of_bytes_written,
            });
        }
        Ok(())
    }

    pub fn read_u16(&self, address: usize) -> Result<u16, MemoryError> {
        let mut buffer = [0; 2];
        self.read(address, &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    pub fn write_u16(&self, address: usize, value: u16) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }

    pub fn read_u32(&self, address: usize) -> Result<u32, MemoryError> {
        let mut buffer = [0; 4];
        self.read(address, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    pub fn write_u32(&self, address: usize, value: u32) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }

    pub fn read_u64(&self, address: usize) -> Result<u64, MemoryError> {
        let mut buffer = [0; 8];
        self.read(address, &mut buffer)?;
        Ok(u64::from_le_bytes(buffer))
    }

    pub fn write_u64(&self, address: usize, value: u64) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }
}

/// WOW64 here means a 32-bit image on a 64-bit OS, so a negative answer on a
/// 64-bit host is a 64-bit process.
fn probe_pointer_width(handle: &SafeHandle) -> PointerWidth {
    let mut wow64 = FALSE;
    match unsafe { IsWow64Process(handle.0, &mut wow64) } {
        Ok(()) if wow64.as_bool() => PointerWidth::Bits32,
        Ok(()) => PointerWidth::Bits64,
        Err(err) => {
            warn!("WOW64 probe failed, assuming 32-bit: {err}");
            PointerWidth::AssumedBits32
        }
    }
}
