mod lua_api;

pub use lua_api::ConfigBuilder;

use std::path::Path;

use mlua::Lua;

use crate::Config;
use crate::errors::ConfigError;

/// Evaluate a Lua config against the `sockwm.*` API and produce a `Config`.
/// `config_dir`, when present, is prepended to the Lua search path so a
/// config can `require` its own helper files.
pub fn parse_lua_config(source: &str, config_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let lua = Lua::new();

    if let Some(dir) = config_dir
        && let Some(dir) = dir.to_str()
    {
        let package: mlua::Table = lua.globals().get("package")?;
        let path: String = package.get("path")?;
        package.set("path", format!("{dir}/?.lua;{path}"))?;
    }

    let builder = lua_api::register_api(&lua)?;
    lua.load(source).exec()?;

    let config = builder.borrow().clone().into_config();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::KeyAction;
    use x11rb::protocol::xproto::KeyButMask;

    #[test]
    fn empty_config_yields_defaults() {
        let config = parse_lua_config("", None).unwrap();
        let defaults = Config::default();
        assert_eq!(config.border_width, defaults.border_width);
        assert_eq!(config.terminal, defaults.terminal);
        assert_eq!(config.socket_path, defaults.socket_path);
        assert_eq!(config.keybindings.len(), defaults.keybindings.len());
    }

    #[test]
    fn settings_are_applied() {
        let config = parse_lua_config(
            r##"
            sockwm.border.set_width(3)
            sockwm.border.set_focused_color("#ff0000")
            sockwm.set_modkey("Mod4")
            sockwm.set_terminal("alacritty")
            sockwm.set_snap(16)
            sockwm.set_resize_hints(false)
            sockwm.set_socket_path("/tmp/test-wm.sock")
            sockwm.bar.set_font("monospace:size=12")
            sockwm.bar.show(false)
            sockwm.autostart("xsetroot -name hello")
            "##,
            None,
        )
        .unwrap();

        assert_eq!(config.border_width, 3);
        assert_eq!(config.border_focused, 0xff0000);
        assert_eq!(config.modkey, KeyButMask::MOD4);
        assert_eq!(config.terminal, "alacritty");
        assert_eq!(config.snap, 16);
        assert!(!config.respect_resize_hints);
        assert_eq!(
            config.socket_path,
            std::path::PathBuf::from("/tmp/test-wm.sock")
        );
        assert_eq!(config.font, "monospace:size=12");
        assert!(!config.show_bar);
        assert_eq!(config.autostart, vec!["xsetroot -name hello".to_string()]);
    }

    #[test]
    fn keybindings_replace_the_defaults_once_declared() {
        let config = parse_lua_config(
            r#"
            sockwm.key.bind({"Mod4"}, "Return", sockwm.spawn_terminal())
            sockwm.key.bind({"Mod4", "Shift"}, "q", sockwm.quit())
            "#,
            None,
        )
        .unwrap();

        assert_eq!(config.keybindings.len(), 2);
        assert_eq!(config.keybindings[1].action(), KeyAction::Quit);
    }

    #[test]
    fn rules_parse() {
        let config = parse_lua_config(
            r#"
            sockwm.rule.add({ class = "Gimp", floating = true })
            sockwm.rule.add({ title = "scratch", floating = false })
            "#,
            None,
        )
        .unwrap();

        // Declared rules replace the built-in table.
        assert_eq!(config.window_rules.len(), 2);
        assert!(config.window_rules[0].is_floating);
        assert_eq!(config.window_rules[1].title.as_deref(), Some("scratch"));
    }

    #[test]
    fn broken_configs_report_errors() {
        assert!(parse_lua_config("sockwm.border.set_width('wide')", None).is_err());
        assert!(parse_lua_config("this is not lua", None).is_err());
        assert!(parse_lua_config("sockwm.set_modkey('Hyper')", None).is_err());
        assert!(
            parse_lua_config("sockwm.key.bind({\"Mod4\"}, \"NoSuchKey\", sockwm.quit())", None)
                .is_err()
        );
    }

    #[test]
    fn template_config_parses() {
        let template = include_str!("../../templates/config.lua");
        let config = parse_lua_config(template, None).unwrap();
        assert!(!config.keybindings.is_empty());
    }
}
