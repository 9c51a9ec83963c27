//! The slice of the X keysym table the default bindings and the Lua config
//! can name. Letter keysyms are the lowercase codepoints, which is what the
//! first column of the server's keyboard mapping reports.

pub type Keysym = u32;

pub const XK_A: Keysym = 0x0061;
pub const XK_B: Keysym = 0x0062;
pub const XK_C: Keysym = 0x0063;
pub const XK_D: Keysym = 0x0064;
pub const XK_E: Keysym = 0x0065;
pub const XK_F: Keysym = 0x0066;
pub const XK_G: Keysym = 0x0067;
pub const XK_H: Keysym = 0x0068;
pub const XK_I: Keysym = 0x0069;
pub const XK_J: Keysym = 0x006a;
pub const XK_K: Keysym = 0x006b;
pub const XK_L: Keysym = 0x006c;
pub const XK_M: Keysym = 0x006d;
pub const XK_N: Keysym = 0x006e;
pub const XK_O: Keysym = 0x006f;
pub const XK_P: Keysym = 0x0070;
pub const XK_Q: Keysym = 0x0071;
pub const XK_R: Keysym = 0x0072;
pub const XK_S: Keysym = 0x0073;
pub const XK_T: Keysym = 0x0074;
pub const XK_U: Keysym = 0x0075;
pub const XK_V: Keysym = 0x0076;
pub const XK_W: Keysym = 0x0077;
pub const XK_X: Keysym = 0x0078;
pub const XK_Y: Keysym = 0x0079;
pub const XK_Z: Keysym = 0x007a;

pub const XK_0: Keysym = 0x0030;
pub const XK_1: Keysym = 0x0031;
pub const XK_2: Keysym = 0x0032;
pub const XK_3: Keysym = 0x0033;
pub const XK_4: Keysym = 0x0034;
pub const XK_5: Keysym = 0x0035;
pub const XK_6: Keysym = 0x0036;
pub const XK_7: Keysym = 0x0037;
pub const XK_8: Keysym = 0x0038;
pub const XK_9: Keysym = 0x0039;

pub const XK_SPACE: Keysym = 0x0020;
pub const XK_RETURN: Keysym = 0xff0d;
pub const XK_TAB: Keysym = 0xff09;
pub const XK_ESCAPE: Keysym = 0xff1b;
pub const XK_BACKSPACE: Keysym = 0xff08;
pub const XK_LEFT: Keysym = 0xff51;
pub const XK_UP: Keysym = 0xff52;
pub const XK_RIGHT: Keysym = 0xff53;
pub const XK_DOWN: Keysym = 0xff54;

pub const XK_F1: Keysym = 0xffbe;
pub const XK_F2: Keysym = 0xffbf;
pub const XK_F3: Keysym = 0xffc0;
pub const XK_F4: Keysym = 0xffc1;
pub const XK_F5: Keysym = 0xffc2;
pub const XK_F6: Keysym = 0xffc3;
pub const XK_F7: Keysym = 0xffc4;
pub const XK_F8: Keysym = 0xffc5;
pub const XK_F9: Keysym = 0xffc6;
pub const XK_F10: Keysym = 0xffc7;
pub const XK_F11: Keysym = 0xffc8;
pub const XK_F12: Keysym = 0xffc9;

/// Resolve a key name used in the config file.
pub fn keysym_from_str(name: &str) -> Option<Keysym> {
    if name.len() == 1 {
        let c = name.chars().next()?;
        if c.is_ascii_alphabetic() {
            return Some(c.to_ascii_lowercase() as Keysym);
        }
        if c.is_ascii_digit() {
            return Some(c as Keysym);
        }
    }

    match name {
        "Return" => Some(XK_RETURN),
        "Space" | "space" => Some(XK_SPACE),
        "Tab" => Some(XK_TAB),
        "Escape" => Some(XK_ESCAPE),
        "BackSpace" => Some(XK_BACKSPACE),
        "Left" => Some(XK_LEFT),
        "Right" => Some(XK_RIGHT),
        "Up" => Some(XK_UP),
        "Down" => Some(XK_DOWN),
        "F1" => Some(XK_F1),
        "F2" => Some(XK_F2),
        "F3" => Some(XK_F3),
        "F4" => Some(XK_F4),
        "F5" => Some(XK_F5),
        "F6" => Some(XK_F6),
        "F7" => Some(XK_F7),
        "F8" => Some(XK_F8),
        "F9" => Some(XK_F9),
        "F10" => Some(XK_F10),
        "F11" => Some(XK_F11),
        "F12" => Some(XK_F12),
        _ => None,
    }
}

pub fn format_keysym(keysym: Keysym) -> String {
    match keysym {
        XK_RETURN => "Return".to_string(),
        XK_SPACE => "Space".to_string(),
        XK_TAB => "Tab".to_string(),
        XK_ESCAPE => "Escape".to_string(),
        XK_BACKSPACE => "BackSpace".to_string(),
        XK_LEFT => "Left".to_string(),
        XK_RIGHT => "Right".to_string(),
        XK_UP => "Up".to_string(),
        XK_DOWN => "Down".to_string(),
        XK_F1..=XK_F12 => format!("F{}", keysym - XK_F1 + 1),
        0x20..=0x7e => char::from_u32(keysym).map(String::from).unwrap_or_default(),
        other => format!("0x{other:04x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_characters_resolve() {
        assert_eq!(keysym_from_str("q"), Some(XK_Q));
        assert_eq!(keysym_from_str("Q"), Some(XK_Q));
        assert_eq!(keysym_from_str("7"), Some(XK_7));
        assert_eq!(keysym_from_str("ß"), None);
    }

    #[test]
    fn named_keys_resolve() {
        assert_eq!(keysym_from_str("Return"), Some(XK_RETURN));
        assert_eq!(keysym_from_str("F11"), Some(XK_F11));
        assert_eq!(keysym_from_str("NoSuchKey"), None);
    }

    #[test]
    fn format_round_trips_names() {
        for name in ["Return", "Tab", "F5", "q"] {
            let keysym = keysym_from_str(name).unwrap();
            assert_eq!(format_keysym(keysym), name);
        }
    }
}
