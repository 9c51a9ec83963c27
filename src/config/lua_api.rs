use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use mlua::{Lua, Table, Value};

use crate::Config;
use crate::errors::ConfigError;
use crate::keyboard::handlers::{Arg, KeyAction, KeyBinding};
use crate::keyboard::keysyms::{self, Keysym};
use x11rb::protocol::xproto::KeyButMask;

/// Accumulates the config as the Lua file executes. Starts from the built-in
/// defaults; the first declared keybinding or rule replaces the respective
/// default table instead of appending to it.
#[derive(Clone)]
pub struct ConfigBuilder {
    config: Config,
    keybindings_declared: bool,
    rules_declared: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            keybindings_declared: false,
            rules_declared: false,
        }
    }
}

impl ConfigBuilder {
    pub fn into_config(self) -> Config {
        self.config
    }

    fn push_keybinding(&mut self, binding: KeyBinding) {
        if !self.keybindings_declared {
            self.config.keybindings.clear();
            self.keybindings_declared = true;
        }
        self.config.keybindings.push(binding);
    }

    fn push_rule(&mut self, rule: crate::WindowRule) {
        if !self.rules_declared {
            self.config.window_rules.clear();
            self.rules_declared = true;
        }
        self.config.window_rules.push(rule);
    }
}

type SharedBuilder = Rc<RefCell<ConfigBuilder>>;

pub fn register_api(lua: &Lua) -> Result<SharedBuilder, ConfigError> {
    let builder = Rc::new(RefCell::new(ConfigBuilder::default()));

    let sockwm_table = lua.create_table()?;

    register_actions(lua, &sockwm_table)?;
    register_key_module(lua, &sockwm_table, builder.clone())?;
    register_border_module(lua, &sockwm_table, builder.clone())?;
    register_bar_module(lua, &sockwm_table, builder.clone())?;
    register_rule_module(lua, &sockwm_table, builder.clone())?;
    register_misc(lua, &sockwm_table, builder.clone())?;

    lua.globals().set("sockwm", sockwm_table)?;

    Ok(builder)
}

fn register_actions(lua: &Lua, parent: &Table) -> Result<(), ConfigError> {
    let spawn = lua.create_function(|lua, cmd: Value| create_action_table(lua, "Spawn", cmd))?;
    let spawn_terminal =
        lua.create_function(|lua, ()| create_action_table(lua, "SpawnTerminal", Value::Nil))?;
    let quit = lua.create_function(|lua, ()| create_action_table(lua, "Quit", Value::Nil))?;

    let client_table = lua.create_table()?;
    let kill = lua.create_function(|lua, ()| create_action_table(lua, "KillClient", Value::Nil))?;
    let toggle_floating =
        lua.create_function(|lua, ()| create_action_table(lua, "ToggleFloating", Value::Nil))?;
    client_table.set("kill", kill)?;
    client_table.set("toggle_floating", toggle_floating)?;

    parent.set("spawn", spawn)?;
    parent.set("spawn_terminal", spawn_terminal)?;
    parent.set("quit", quit)?;
    parent.set("client", client_table)?;
    Ok(())
}

fn register_key_module(
    lua: &Lua,
    parent: &Table,
    builder: SharedBuilder,
) -> Result<(), ConfigError> {
    let key_table = lua.create_table()?;

    let builder_clone = builder.clone();
    let bind = lua.create_function(move |lua, (mods, key, action): (Value, String, Value)| {
        let modifiers = parse_modifiers_value(lua, mods)?;
        let keysym = parse_keysym(&key)?;
        let (key_action, arg) = parse_action_value(lua, action)?;

        let binding = KeyBinding::new(modifiers, keysym, key_action, arg);
        builder_clone.borrow_mut().push_keybinding(binding);

        Ok(())
    })?;

    key_table.set("bind", bind)?;
    parent.set("key", key_table)?;
    Ok(())
}

fn register_border_module(
    lua: &Lua,
    parent: &Table,
    builder: SharedBuilder,
) -> Result<(), ConfigError> {
    let border_table = lua.create_table()?;

    let builder_clone = builder.clone();
    let set_width = lua.create_function(move |_, width: u32| {
        builder_clone.borrow_mut().config.border_width = width;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_focused_color = lua.create_function(move |_, color: Value| {
        builder_clone.borrow_mut().config.border_focused = parse_color_value(color)?;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_unfocused_color = lua.create_function(move |_, color: Value| {
        builder_clone.borrow_mut().config.border_unfocused = parse_color_value(color)?;
        Ok(())
    })?;

    border_table.set("set_width", set_width)?;
    border_table.set("set_focused_color", set_focused_color)?;
    border_table.set("set_unfocused_color", set_unfocused_color)?;
    parent.set("border", border_table)?;
    Ok(())
}

fn register_bar_module(
    lua: &Lua,
    parent: &Table,
    builder: SharedBuilder,
) -> Result<(), ConfigError> {
    let bar_table = lua.create_table()?;

    let builder_clone = builder.clone();
    let set_font = lua.create_function(move |_, font: String| {
        builder_clone.borrow_mut().config.font = font;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let show = lua.create_function(move |_, visible: bool| {
        builder_clone.borrow_mut().config.show_bar = visible;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_scheme_normal = lua.create_function(move |_, (fg, bg, border): (Value, Value, Value)| {
        builder_clone.borrow_mut().config.scheme_normal = crate::ColorScheme {
            foreground: parse_color_value(fg)?,
            background: parse_color_value(bg)?,
            border: parse_color_value(border)?,
        };
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_scheme_selected =
        lua.create_function(move |_, (fg, bg, border): (Value, Value, Value)| {
            builder_clone.borrow_mut().config.scheme_selected = crate::ColorScheme {
                foreground: parse_color_value(fg)?,
                background: parse_color_value(bg)?,
                border: parse_color_value(border)?,
            };
            Ok(())
        })?;

    let toggle = lua.create_function(|lua, ()| create_action_table(lua, "ToggleBar", Value::Nil))?;

    bar_table.set("set_font", set_font)?;
    bar_table.set("show", show)?;
    bar_table.set("set_scheme_normal", set_scheme_normal)?;
    bar_table.set("set_scheme_selected", set_scheme_selected)?;
    bar_table.set("toggle", toggle)?;
    parent.set("bar", bar_table)?;
    Ok(())
}

fn register_rule_module(
    lua: &Lua,
    parent: &Table,
    builder: SharedBuilder,
) -> Result<(), ConfigError> {
    let rule_table = lua.create_table()?;

    let builder_clone = builder.clone();
    let add = lua.create_function(move |_, config: Table| {
        let class: Option<String> = config.get("class").ok();
        let instance: Option<String> = config.get("instance").ok();
        let title: Option<String> = config.get("title").ok();
        let is_floating: bool = config.get("floating").unwrap_or(false);

        builder_clone.borrow_mut().push_rule(crate::WindowRule {
            class,
            instance,
            title,
            is_floating,
        });
        Ok(())
    })?;

    rule_table.set("add", add)?;
    parent.set("rule", rule_table)?;
    Ok(())
}

fn register_misc(lua: &Lua, parent: &Table, builder: SharedBuilder) -> Result<(), ConfigError> {
    let builder_clone = builder.clone();
    let set_terminal = lua.create_function(move |_, term: String| {
        builder_clone.borrow_mut().config.terminal = term;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_launcher = lua.create_function(move |_, argv: Vec<String>| {
        builder_clone.borrow_mut().config.launcher = argv;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_switcher = lua.create_function(move |_, argv: Vec<String>| {
        builder_clone.borrow_mut().config.switcher = argv;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_modkey = lua.create_function(move |_, modkey_str: String| {
        let modkey = parse_modkey_string(&modkey_str)
            .map_err(|e| mlua::Error::RuntimeError(format!("{e}")))?;
        builder_clone.borrow_mut().config.modkey = modkey;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_snap = lua.create_function(move |_, snap: i32| {
        builder_clone.borrow_mut().config.snap = snap.max(0);
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_resize_hints = lua.create_function(move |_, respect: bool| {
        builder_clone.borrow_mut().config.respect_resize_hints = respect;
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let set_socket_path = lua.create_function(move |_, path: String| {
        builder_clone.borrow_mut().config.socket_path = PathBuf::from(path);
        Ok(())
    })?;

    let builder_clone = builder.clone();
    let autostart = lua.create_function(move |_, cmd: String| {
        builder_clone.borrow_mut().config.autostart.push(cmd);
        Ok(())
    })?;

    parent.set("set_terminal", set_terminal)?;
    parent.set("set_launcher", set_launcher)?;
    parent.set("set_switcher", set_switcher)?;
    parent.set("set_modkey", set_modkey)?;
    parent.set("set_snap", set_snap)?;
    parent.set("set_resize_hints", set_resize_hints)?;
    parent.set("set_socket_path", set_socket_path)?;
    parent.set("autostart", autostart)?;
    Ok(())
}

fn parse_modifiers_value(_lua: &Lua, value: Value) -> mlua::Result<Vec<KeyButMask>> {
    match value {
        Value::Table(t) => {
            let mut mods = Vec::new();
            for i in 1..=t.len()? {
                let mod_str: String = t.get(i)?;
                let mask = parse_modkey_string(&mod_str).map_err(|e| {
                    mlua::Error::RuntimeError(format!("sockwm.key.bind: invalid modifier - {e}"))
                })?;
                mods.push(mask);
            }
            Ok(mods)
        }
        Value::String(s) => {
            let s_str = s.to_str()?;
            let mask = parse_modkey_string(&s_str).map_err(|e| {
                mlua::Error::RuntimeError(format!("sockwm.key.bind: invalid modifier - {e}"))
            })?;
            Ok(vec![mask])
        }
        _ => Err(mlua::Error::RuntimeError(
            "sockwm.key.bind: first argument must be a table of modifiers like {\"Mod1\"} or {\"Mod1\", \"Shift\"}".into(),
        )),
    }
}

fn parse_modkey_string(s: &str) -> Result<KeyButMask, ConfigError> {
    match s {
        "Mod1" => Ok(KeyButMask::MOD1),
        "Mod2" => Ok(KeyButMask::MOD2),
        "Mod3" => Ok(KeyButMask::MOD3),
        "Mod4" => Ok(KeyButMask::MOD4),
        "Mod5" => Ok(KeyButMask::MOD5),
        "Shift" => Ok(KeyButMask::SHIFT),
        "Control" => Ok(KeyButMask::CONTROL),
        _ => Err(ConfigError::InvalidModkey(format!(
            "'{s}' is not a valid modifier. Use one of: Mod1, Mod4, Shift, Control"
        ))),
    }
}

fn parse_keysym(key: &str) -> mlua::Result<Keysym> {
    keysyms::keysym_from_str(key).ok_or_else(|| {
        mlua::Error::RuntimeError(format!(
            "unknown key '{key}'. valid keys include: Return, Space, a-z, 0-9, F1-F12, Left, Right, Up, Down"
        ))
    })
}

fn parse_action_value(_lua: &Lua, value: Value) -> mlua::Result<(KeyAction, Arg)> {
    match value {
        Value::Function(_) => Err(mlua::Error::RuntimeError(
            "action must be a function call, not a function reference. did you forget ()? example: sockwm.spawn('st') not sockwm.spawn".into(),
        )),
        Value::Table(t) => {
            if let Ok(action_name) = t.get::<String>("__action") {
                let action = string_to_action(&action_name)?;
                let arg = if let Ok(arg_val) = t.get::<Value>("__arg") {
                    value_to_arg(arg_val)?
                } else {
                    Arg::None
                };
                return Ok((action, arg));
            }

            Err(mlua::Error::RuntimeError(
                "action must be a table returned by sockwm functions like sockwm.spawn(), sockwm.client.kill(), sockwm.quit()".into(),
            ))
        }
        _ => Err(mlua::Error::RuntimeError(
            "action must be a table returned by sockwm functions like sockwm.spawn(), sockwm.client.kill(), sockwm.quit()".into(),
        )),
    }
}

fn string_to_action(s: &str) -> mlua::Result<KeyAction> {
    match s {
        "Spawn" => Ok(KeyAction::Spawn),
        "SpawnTerminal" => Ok(KeyAction::SpawnTerminal),
        "KillClient" => Ok(KeyAction::KillClient),
        "ToggleBar" => Ok(KeyAction::ToggleBar),
        "ToggleFloating" => Ok(KeyAction::ToggleFloating),
        "Quit" => Ok(KeyAction::Quit),
        _ => Err(mlua::Error::RuntimeError(format!(
            "unknown action '{s}'. this is an internal error, please report it"
        ))),
    }
}

fn value_to_arg(value: Value) -> mlua::Result<Arg> {
    match value {
        Value::Nil => Ok(Arg::None),
        Value::String(s) => Ok(Arg::Str(s.to_str()?.to_string())),
        Value::Integer(i) => Ok(Arg::Int(i as i32)),
        Value::Number(n) => Ok(Arg::Int(n as i32)),
        Value::Table(t) => {
            let mut arr = Vec::new();
            for i in 1..=t.len()? {
                let item: String = t.get(i)?;
                arr.push(item);
            }
            Ok(Arg::Array(arr))
        }
        _ => Ok(Arg::None),
    }
}

fn create_action_table(lua: &Lua, action_name: &str, arg: Value) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("__action", action_name)?;
    table.set("__arg", arg)?;
    Ok(table)
}

fn parse_color_value(value: Value) -> mlua::Result<u32> {
    match value {
        Value::Integer(i) => Ok(i as u32),
        Value::Number(n) => Ok(n as u32),
        Value::String(s) => {
            let s = s.to_str()?;
            let hex = s.strip_prefix('#').or_else(|| s.strip_prefix("0x"));
            match hex {
                Some(hex) => u32::from_str_radix(hex, 16).map_err(|e| {
                    mlua::Error::RuntimeError(format!(
                        "invalid hex color '{s}': {e}. use format like #ff0000 or 0xff0000"
                    ))
                }),
                None => s.parse::<u32>().map_err(|e| {
                    mlua::Error::RuntimeError(format!(
                        "invalid color '{s}': {e}. use hex format like 0xff0000 or #ff0000"
                    ))
                }),
            }
        }
        _ => Err(mlua::Error::RuntimeError(
            "color must be a number (0xff0000) or string ('#ff0000' or '0xff0000')".into(),
        )),
    }
}
