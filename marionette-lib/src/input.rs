use std::{mem::size_of, thread::sleep, time::Duration};

use rand::{rngs::SmallRng, SeedableRng};
use tracing::trace;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    MapVirtualKeyW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, KEYEVENTF_SCANCODE, MAPVK_VK_TO_VSC, MOUSEEVENTF_LEFTDOWN,
    MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP,
    MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};

use crate::jitter::{plan_path, JitterConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// One logical input intent, translated to OS events at send time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    KeyPress(VIRTUAL_KEY),
    MouseMoveRelative(i32, i32),
    MouseMoveJittered(i32, i32),
    MouseClick(MouseButton),
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input injection refused by the OS: {0}")]
    InjectionFailed(#[source] windows::core::Error),
}

/// Turns logical key/mouse intents into synthetic hardware events. All calls
/// block the caller for their settle delays; run the synthesizer on a
/// dedicated thread if that matters.
pub struct InputSynthesizer {
    jitter: JitterConfig,
    settle_delay: Duration,
    rng: SmallRng,
}

impl InputSynthesizer {
    pub fn new() -> Self {
        Self::with_config(JitterConfig::default())
    }

    pub fn with_config(jitter: JitterConfig) -> Self {
        Self {
            jitter,
            settle_delay: Duration::from_millis(10),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Taps `key`: scan-code key-down, a short settle, scan-code key-up.
    ///
    /// Games polling the keyboard driver see scan codes, not the virtual-key
    /// messages the window queue carries, so the event must be flagged as a
    /// scan code. The translation depends on the active keyboard layout and
    /// is resolved on every call rather than cached.
    pub fn send_key(&mut self, key: VIRTUAL_KEY) -> Result<(), InputError> {
        let scan_code = unsafe { MapVirtualKeyW(key.0 as u32, MAPVK_VK_TO_VSC) } as u16;
        trace!(vk = key.0, scan_code, "key tap");
        // A failed key-down gets no compensating key-up; the down may never
        // have been delivered.
        send_one(key_input(scan_code, KEYEVENTF_SCANCODE))?;
        sleep(self.settle_delay);
        send_one(key_input(scan_code, KEYEVENTF_SCANCODE | KEYEVENTF_KEYUP))
    }

    /// One relative move, sent as-is.
    pub fn send_mouse_move_relative(&mut self, dx: i32, dy: i32) -> Result<(), InputError> {
        send_one(mouse_input(dx, dy, MOUSEEVENTF_MOVE))
    }

    /// Walks the cursor to `(target_x, target_y)` relative to its current
    /// position over a freshly sampled randomized path, sleeping between
    /// sub-moves.
    pub fn send_mouse_move_jittered(
        &mut self,
        target_x: i32,
        target_y: i32,
    ) -> Result<(), InputError> {
        let plan = plan_path(&mut self.rng, &self.jitter, target_x, target_y);
        trace!(target_x, target_y, steps = plan.len(), "jittered move");
        for step in plan {
            send_one(mouse_input(step.dx, step.dy, MOUSEEVENTF_MOVE))?;
            sleep(step.settle);
        }
        Ok(())
    }

    /// Clicks `button`: down, a short settle, up.
    pub fn send_mouse_click(&mut self, button: MouseButton) -> Result<(), InputError> {
        let (down, up) = button_flags(button);
        send_one(mouse_input(0, 0, down))?;
        sleep(self.settle_delay);
        send_one(mouse_input(0, 0, up))
    }

    pub fn send(&mut self, event: InputEvent) -> Result<(), InputError> {
        match event {
            InputEvent::KeyPress(key) => self.send_key(key),
            InputEvent::MouseMoveRelative(dx, dy) => self.send_mouse_move_relative(dx, dy),
            InputEvent::MouseMoveJittered(x, y) => self.send_mouse_move_jittered(x, y),
            InputEvent::MouseClick(button) => self.send_mouse_click(button),
        }
    }
}

impl Default for InputSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

fn button_flags(button: MouseButton) -> (MOUSE_EVENT_FLAGS, MOUSE_EVENT_FLAGS) {
    match button {
        MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
        MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
    }
}

fn key_input(scan_code: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                // Scan-code events leave the virtual key empty.
                wVk: VIRTUAL_KEY(0),
                wScan: scan_code,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn mouse_input(dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx,
                dy,
                mouseData: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn send_one(input: INPUT) -> Result<(), InputError> {
    let sent = unsafe { SendInput(&[input], size_of::<INPUT>() as i32) };
    if sent != 1 {
        return Err(InputError::InjectionFailed(
            windows::core::Error::from_win32(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use windows::Win32::UI::Input::KeyboardAndMouse::VK_A;

    use super::*;

    #[test]
    fn scan_code_events_leave_virtual_key_empty() {
        let input = key_input(0x1E, KEYEVENTF_SCANCODE);
        assert_eq!(input.r#type, INPUT_KEYBOARD);
        let ki = unsafe { input.Anonymous.ki };
        assert_eq!(ki.wVk, VIRTUAL_KEY(0));
        assert_eq!(ki.wScan, 0x1E);
        assert!(ki.dwFlags.contains(KEYEVENTF_SCANCODE));
        assert!(!ki.dwFlags.contains(KEYEVENTF_KEYUP));
    }

    #[test]
    fn key_up_keeps_the_scan_code_flag() {
        let input = key_input(0x1E, KEYEVENTF_SCANCODE | KEYEVENTF_KEYUP);
        let ki = unsafe { input.Anonymous.ki };
        assert!(ki.dwFlags.contains(KEYEVENTF_SCANCODE));
        assert!(ki.dwFlags.contains(KEYEVENTF_KEYUP));
    }

    #[test]
    fn layout_translation_yields_a_scan_code() {
        // VK_A maps to 0x1E on the common layouts; at minimum the layout
        // must map it to something.
        let scan_code = unsafe { MapVirtualKeyW(VK_A.0 as u32, MAPVK_VK_TO_VSC) };
        assert_ne!(scan_code, 0);
    }

    #[test]
    fn relative_move_builds_a_move_event() {
        let input = mouse_input(10, -4, MOUSEEVENTF_MOVE);
        assert_eq!(input.r#type, INPUT_MOUSE);
        let mi = unsafe { input.Anonymous.mi };
        assert_eq!((mi.dx, mi.dy), (10, -4));
        assert_eq!(mi.dwFlags, MOUSEEVENTF_MOVE);
    }

    #[test]
    fn button_flags_pair_down_with_up() {
        assert_eq!(
            button_flags(MouseButton::Left),
            (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP)
        );
        assert_eq!(
            button_flags(MouseButton::Right),
            (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP)
        );
    }
}
