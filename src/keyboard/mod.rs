pub mod handlers;
pub mod keysyms;

pub use handlers::{Arg, KeyAction, KeyBinding, KeyboardMapping, modifiers_to_mask};

use x11rb::protocol::xproto::{KeyButMask, KeyPressEvent};

/// Modifier state with Lock and NumLock stripped, so bindings fire
/// regardless of lock keys.
pub fn clean_mask(state: KeyButMask) -> u16 {
    u16::from(state) & !(u16::from(KeyButMask::LOCK) | u16::from(KeyButMask::MOD2))
}

/// Match a key press against the configured bindings.
pub fn match_binding<'a>(
    event: &KeyPressEvent,
    bindings: &'a [KeyBinding],
    mapping: &KeyboardMapping,
) -> Option<(&'a KeyAction, &'a Arg)> {
    let keysym = mapping.keycode_to_keysym(event.detail);
    let state = clean_mask(event.state);

    bindings
        .iter()
        .find(|binding| {
            binding.keysym == keysym && modifiers_to_mask(&binding.modifiers) == state
        })
        .map(|binding| (&binding.action, &binding.arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> KeyboardMapping {
        KeyboardMapping {
            syms: vec![keysyms::XK_Q, keysyms::XK_B],
            keysyms_per_keycode: 1,
            min_keycode: 24,
        }
    }

    fn key_press(detail: u8, state: KeyButMask) -> KeyPressEvent {
        KeyPressEvent {
            response_type: x11rb::protocol::xproto::KEY_PRESS_EVENT,
            detail,
            sequence: 0,
            time: 0,
            root: 0,
            event: 0,
            child: 0,
            root_x: 0,
            root_y: 0,
            event_x: 0,
            event_y: 0,
            state,
            same_screen: true,
        }
    }

    #[test]
    fn lock_modifiers_are_ignored() {
        let bindings = vec![KeyBinding::new(
            vec![KeyButMask::MOD1],
            keysyms::XK_Q,
            KeyAction::Quit,
            Arg::None,
        )];
        let mapping = mapping();

        let event = key_press(24, KeyButMask::MOD1 | KeyButMask::LOCK | KeyButMask::MOD2);
        let matched = match_binding(&event, &bindings, &mapping);
        assert!(matches!(matched, Some((KeyAction::Quit, _))));
    }

    #[test]
    fn wrong_modifiers_do_not_match() {
        let bindings = vec![KeyBinding::new(
            vec![KeyButMask::MOD1, KeyButMask::SHIFT],
            keysyms::XK_Q,
            KeyAction::Quit,
            Arg::None,
        )];
        let mapping = mapping();

        let event = key_press(24, KeyButMask::MOD1);
        assert!(match_binding(&event, &bindings, &mapping).is_none());
    }

    #[test]
    fn unknown_keycodes_do_not_match() {
        let bindings = vec![KeyBinding::new(
            vec![],
            keysyms::XK_Q,
            KeyAction::Quit,
            Arg::None,
        )];
        let mapping = mapping();

        let event = key_press(99, KeyButMask::from(0u16));
        assert!(match_binding(&event, &bindings, &mapping).is_none());
    }
}
