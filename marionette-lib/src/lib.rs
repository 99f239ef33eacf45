#[cfg(target_os = "windows")]
mod find_process_id;
#[cfg(target_os = "windows")]
pub mod input;
pub mod jitter;
#[cfg(target_os = "windows")]
pub mod present_hook;
#[cfg(target_os = "windows")]
pub mod process;
#[cfg(target_os = "windows")]
mod win_api_wrappers;

#[cfg(target_os = "windows")]
pub use crate::{
    input::{InputError, InputEvent, InputSynthesizer, MouseButton},
    present_hook::{create_swap_chain, HookError, PresentFn, PresentHook, PRESENT_VTABLE_SLOT},
    process::{AttachError, ExternalProcess, MemoryError, PointerWidth},
};
pub use crate::jitter::{plan_path, JitterConfig, JitterStep};
