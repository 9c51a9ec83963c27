use std::path::PathBuf;

pub mod bar;
pub mod client;
pub mod config;
pub mod control;
pub mod errors;
pub mod keyboard;
pub mod monitor;
pub mod signal;
pub mod size_hints;
pub mod window_manager;

pub mod prelude {
    pub use crate::ColorScheme;
    pub use crate::WindowRule;
    pub use crate::keyboard::{Arg, KeyAction, handlers::KeyBinding, keysyms};
    pub use x11rb::protocol::xproto::KeyButMask;
}

/// Matching is substring-based on whatever fields are present; an absent
/// field matches everything.
#[derive(Debug, Clone)]
pub struct WindowRule {
    pub class: Option<String>,
    pub instance: Option<String>,
    pub title: Option<String>,
    pub is_floating: bool,
}

impl WindowRule {
    pub fn matches(&self, class: &str, instance: &str, title: &str) -> bool {
        let class_matches = self
            .class
            .as_ref()
            .is_none_or(|c| class.contains(c.as_str()));
        let instance_matches = self
            .instance
            .as_ref()
            .is_none_or(|i| instance.contains(i.as_str()));
        let title_matches = self
            .title
            .as_ref()
            .is_none_or(|t| title.contains(t.as_str()));
        class_matches && instance_matches && title_matches
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColorScheme {
    pub foreground: u32,
    pub background: u32,
    pub border: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Meta
    pub path: Option<PathBuf>,

    // Appearance
    pub border_width: u32,
    pub border_focused: u32,
    pub border_unfocused: u32,
    pub font: String,
    pub show_bar: bool,
    pub scheme_normal: ColorScheme,
    pub scheme_selected: ColorScheme,

    // Behavior
    pub snap: i32,
    pub respect_resize_hints: bool,
    pub modkey: x11rb::protocol::xproto::KeyButMask,

    // Commands
    pub terminal: String,
    pub launcher: Vec<String>,
    pub switcher: Vec<String>,

    // Control plane
    pub socket_path: PathBuf,

    // Window rules
    pub window_rules: Vec<WindowRule>,

    // Keybindings
    pub keybindings: Vec<crate::keyboard::handlers::KeyBinding>,

    pub autostart: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        use crate::keyboard::handlers::KeyBinding;
        use crate::keyboard::{Arg, KeyAction, keysyms};
        use x11rb::protocol::xproto::KeyButMask;

        const MODKEY: KeyButMask = KeyButMask::MOD1;
        const SHIFT: KeyButMask = KeyButMask::SHIFT;

        Self {
            path: None,
            border_width: 1,
            border_focused: 0xffffff,
            border_unfocused: 0x000000,
            font: "monospace:size=10".to_string(),
            show_bar: true,
            scheme_normal: ColorScheme {
                foreground: 0x000000,
                background: 0xffffff,
                border: 0x000000,
            },
            scheme_selected: ColorScheme {
                foreground: 0xffffff,
                background: 0x000000,
                border: 0xffffff,
            },
            snap: 32,
            respect_resize_hints: true,
            modkey: MODKEY,
            terminal: "uxterm".to_string(),
            launcher: vec!["launch_app".to_string()],
            switcher: vec!["switch_app".to_string()],
            socket_path: PathBuf::from("/tmp/sockwm.sock"),
            window_rules: vec![WindowRule {
                class: Some("Gimp".to_string()),
                instance: None,
                title: None,
                is_floating: true,
            }],
            keybindings: vec![
                KeyBinding::new(
                    vec![MODKEY],
                    keysyms::XK_F,
                    KeyAction::Spawn,
                    Arg::Array(vec!["launch_app".to_string()]),
                ),
                KeyBinding::new(
                    vec![MODKEY],
                    keysyms::XK_J,
                    KeyAction::Spawn,
                    Arg::Array(vec!["switch_app".to_string()]),
                ),
                KeyBinding::new(
                    vec![MODKEY],
                    keysyms::XK_RETURN,
                    KeyAction::SpawnTerminal,
                    Arg::None,
                ),
                KeyBinding::new(vec![MODKEY], keysyms::XK_B, KeyAction::ToggleBar, Arg::None),
                KeyBinding::new(
                    vec![MODKEY, SHIFT],
                    keysyms::XK_SPACE,
                    KeyAction::ToggleFloating,
                    Arg::None,
                ),
                KeyBinding::new(
                    vec![MODKEY, SHIFT],
                    keysyms::XK_C,
                    KeyAction::KillClient,
                    Arg::None,
                ),
                KeyBinding::new(
                    vec![MODKEY, SHIFT],
                    keysyms::XK_Q,
                    KeyAction::Quit,
                    Arg::None,
                ),
            ],
            autostart: vec![],
        }
    }
}
