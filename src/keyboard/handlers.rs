use serde::Deserialize;
use x11rb::protocol::xproto::{KeyButMask, Keycode};

use crate::keyboard::keysyms::{Keysym, format_keysym};
use crate::signal;

/// When adding a new action, update:
/// 1. Add variant here
/// 2. lua_api.rs: string_to_action()
/// 3. lua_api.rs: the module exposing it
/// 4. window_manager.rs: handle_key_action()
/// 5. templates/config.lua
#[derive(Debug, Copy, Clone, Deserialize, PartialEq)]
pub enum KeyAction {
    Spawn,
    SpawnTerminal,
    KillClient,
    ToggleBar,
    ToggleFloating,
    Quit,
    None,
}

#[derive(Debug, Clone)]
pub enum Arg {
    None,
    Int(i32),
    Str(String),
    Array(Vec<String>),
}

impl Arg {
    pub const fn none() -> Self {
        Arg::None
    }
}

#[derive(Clone)]
pub struct KeyBinding {
    pub(crate) modifiers: Vec<KeyButMask>,
    pub(crate) keysym: Keysym,
    pub(crate) action: KeyAction,
    pub(crate) arg: Arg,
}

impl std::fmt::Debug for KeyBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBinding")
            .field("modifiers", &self.modifiers)
            .field("keysym", &format_keysym(self.keysym))
            .field("action", &self.action)
            .finish()
    }
}

impl KeyBinding {
    pub fn new(modifiers: Vec<KeyButMask>, keysym: Keysym, action: KeyAction, arg: Arg) -> Self {
        Self {
            modifiers,
            keysym,
            action,
            arg,
        }
    }

    pub fn keysym(&self) -> Keysym {
        self.keysym
    }

    pub fn action(&self) -> KeyAction {
        self.action
    }
}

pub fn modifiers_to_mask(modifiers: &[KeyButMask]) -> u16 {
    modifiers
        .iter()
        .fold(0u16, |acc, &modifier| acc | u16::from(modifier))
}

/// The server's keycode-to-keysym table, refreshed on MappingNotify.
pub struct KeyboardMapping {
    pub syms: Vec<Keysym>,
    pub keysyms_per_keycode: u8,
    pub min_keycode: Keycode,
}

impl KeyboardMapping {
    pub fn keycode_to_keysym(&self, keycode: Keycode) -> Keysym {
        if keycode < self.min_keycode {
            return 0;
        }
        let index = (keycode - self.min_keycode) as usize * self.keysyms_per_keycode as usize;
        self.syms.get(index).copied().unwrap_or(0)
    }

    pub fn find_keycode(
        &self,
        keysym: Keysym,
        min_keycode: Keycode,
        max_keycode: Keycode,
    ) -> Option<Keycode> {
        for keycode in min_keycode..=max_keycode {
            let index = (keycode - self.min_keycode) as usize * self.keysyms_per_keycode as usize;
            if let Some(&sym) = self.syms.get(index)
                && sym == keysym
            {
                return Some(keycode);
            }
        }
        None
    }
}

pub fn handle_spawn_action(arg: &Arg) {
    match arg {
        Arg::Str(command) => signal::spawn_detached(command),
        Arg::Array(argv) => signal::spawn_detached_argv(argv),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::keysyms;

    fn mapping() -> KeyboardMapping {
        // Keycodes 8..=10 mapped to q, w, e; two keysyms per keycode.
        KeyboardMapping {
            syms: vec![keysyms::XK_Q, 0x51, keysyms::XK_W, 0x57, keysyms::XK_E, 0x45],
            keysyms_per_keycode: 2,
            min_keycode: 8,
        }
    }

    #[test]
    fn keycode_resolves_to_first_column_keysym() {
        let mapping = mapping();
        assert_eq!(mapping.keycode_to_keysym(8), keysyms::XK_Q);
        assert_eq!(mapping.keycode_to_keysym(9), keysyms::XK_W);
        assert_eq!(mapping.keycode_to_keysym(7), 0);
        assert_eq!(mapping.keycode_to_keysym(200), 0);
    }

    #[test]
    fn find_keycode_inverts_the_mapping() {
        let mapping = mapping();
        assert_eq!(mapping.find_keycode(keysyms::XK_E, 8, 10), Some(10));
        assert_eq!(mapping.find_keycode(keysyms::XK_Z, 8, 10), None);
    }

    #[test]
    fn modifier_masks_combine() {
        let mask = modifiers_to_mask(&[KeyButMask::MOD1, KeyButMask::SHIFT]);
        assert_eq!(
            mask,
            u16::from(KeyButMask::MOD1) | u16::from(KeyButMask::SHIFT)
        );
    }
}
