//! Mouse and keyboard input for driving the game.
//!
//! `Actuator` is the only owner of "which buttons are down". It never presses
//! a button that is already held, and it releases everything on teardown,
//! including when dropped during an error unwind.
//!
//! On Windows the backend uses SendInput, which simulates hardware-level input
//! that the game's input layer (DirectInput/RawInput) processes correctly.

use thiserror::Error;

use crate::automation::controller::{Action, ControlDecision};

/// Input injection failed. Fatal for the session: a key may be stuck.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("input injection failed: {0}")]
pub struct ActuatorFault(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MouseButton {
    Left,
    Right,
}

impl MouseButton {
    fn index(self) -> usize {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
        }
    }
}

/// Raw OS input operations.
pub trait InputBackend {
    fn button_down(&mut self, button: MouseButton) -> Result<(), ActuatorFault>;
    fn button_up(&mut self, button: MouseButton) -> Result<(), ActuatorFault>;
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), ActuatorFault>;
    fn tap_key(&mut self, key: char) -> Result<(), ActuatorFault>;
    fn type_text(&mut self, text: &str) -> Result<(), ActuatorFault>;
}

/// Tracks held buttons on top of an input backend.
pub struct Actuator<B: InputBackend> {
    backend: B,
    /// Button that reels and casts
    action_button: MouseButton,
    held: [bool; 2],
}

impl<B: InputBackend> Actuator<B> {
    pub fn new(backend: B, action_button: MouseButton) -> Self {
        Self {
            backend,
            action_button,
            held: [false; 2],
        }
    }

    /// True while the action button is down.
    pub fn is_held(&self) -> bool {
        self.held[self.action_button.index()]
    }

    pub fn any_held(&self) -> bool {
        self.held.iter().any(|&h| h)
    }

    /// Applies a controller decision. Repeated holds and no-ops send nothing.
    pub fn apply(&mut self, decision: &ControlDecision) -> Result<(), ActuatorFault> {
        match decision.action {
            Action::Hold => self.press(self.action_button),
            Action::Release => self.release(self.action_button),
            Action::NoOp => Ok(()),
        }
    }

    pub fn press(&mut self, button: MouseButton) -> Result<(), ActuatorFault> {
        if self.held[button.index()] {
            return Ok(());
        }
        self.backend.button_down(button)?;
        self.held[button.index()] = true;
        Ok(())
    }

    pub fn release(&mut self, button: MouseButton) -> Result<(), ActuatorFault> {
        if !self.held[button.index()] {
            return Ok(());
        }
        // Marked released even on failure so teardown does not retry forever
        self.held[button.index()] = false;
        self.backend.button_up(button)
    }

    pub fn hold_action(&mut self) -> Result<(), ActuatorFault> {
        self.press(self.action_button)
    }

    pub fn release_action(&mut self) -> Result<(), ActuatorFault> {
        self.release(self.action_button)
    }

    /// Releases every held button. Returns the first failure.
    pub fn release_all(&mut self) -> Result<(), ActuatorFault> {
        let mut result = Ok(());
        for button in [MouseButton::Left, MouseButton::Right] {
            if let Err(e) = self.release(button) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub fn move_to(&mut self, x: i32, y: i32) -> Result<(), ActuatorFault> {
        self.backend.move_to(x, y)
    }

    pub fn tap_key(&mut self, key: char) -> Result<(), ActuatorFault> {
        self.backend.tap_key(key)
    }

    pub fn type_text(&mut self, text: &str) -> Result<(), ActuatorFault> {
        self.backend.type_text(text)
    }
}

impl<B: InputBackend> Drop for Actuator<B> {
    fn drop(&mut self) {
        if self.any_held() {
            if let Err(e) = self.release_all() {
                log::error!("Failed to release input on shutdown: {}", e);
            }
        }
    }
}

#[cfg(windows)]
pub use self::sendinput::SendInputBackend;

#[cfg(windows)]
mod sendinput {
    use super::{ActuatorFault, InputBackend, MouseButton};

    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
        KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEEVENTF_LEFTDOWN,
        MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP,
        MOUSE_EVENT_FLAGS, MOUSEINPUT, VIRTUAL_KEY,
    };
    use windows::Win32::UI::WindowsAndMessaging::SetCursorPos;

    /// Hardware-level input through SendInput. Moves the real cursor.
    #[derive(Default)]
    pub struct SendInputBackend;

    fn send(inputs: &[INPUT]) -> Result<(), ActuatorFault> {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(ActuatorFault(format!(
                "SendInput accepted {} of {} events",
                sent,
                inputs.len()
            )));
        }
        Ok(())
    }

    fn mouse(flags: MOUSE_EVENT_FLAGS, dy: i32) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dy,
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        }
    }

    fn key(vk: VIRTUAL_KEY, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: vk,
                    wScan: scan,
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        }
    }

    impl InputBackend for SendInputBackend {
        fn button_down(&mut self, button: MouseButton) -> Result<(), ActuatorFault> {
            let flags = match button {
                MouseButton::Left => MOUSEEVENTF_LEFTDOWN,
                MouseButton::Right => MOUSEEVENTF_RIGHTDOWN,
            };
            send(&[mouse(flags, 0)])
        }

        fn button_up(&mut self, button: MouseButton) -> Result<(), ActuatorFault> {
            let flags = match button {
                MouseButton::Left => MOUSEEVENTF_LEFTUP,
                MouseButton::Right => MOUSEEVENTF_RIGHTUP,
            };
            send(&[mouse(flags, 0)])
        }

        fn move_to(&mut self, x: i32, y: i32) -> Result<(), ActuatorFault> {
            unsafe { SetCursorPos(x, y) }
                .map_err(|e| ActuatorFault(format!("SetCursorPos failed: {}", e)))?;
            // A relative nudge makes the game register the new cursor position
            send(&[mouse(MOUSEEVENTF_MOVE, 1)])
        }

        fn tap_key(&mut self, ch: char) -> Result<(), ActuatorFault> {
            let scan = unsafe { VkKeyScanW(ch as u16) };
            if scan == -1 {
                return Err(ActuatorFault(format!("no virtual key for {:?}", ch)));
            }
            let vk = VIRTUAL_KEY((scan & 0xFF) as u16);
            send(&[
                key(vk, 0, KEYBD_EVENT_FLAGS(0)),
                key(vk, 0, KEYEVENTF_KEYUP),
            ])
        }

        fn type_text(&mut self, text: &str) -> Result<(), ActuatorFault> {
            let inputs: Vec<INPUT> = text
                .encode_utf16()
                .flat_map(|unit| {
                    [
                        key(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE),
                        key(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP),
                    ]
                })
                .collect();
            send(&inputs)
        }
    }
}
