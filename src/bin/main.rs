use std::path::Path;
use std::path::PathBuf;

use sockwm::errors::MainError;

const CONFIG_FILE: &str = "config.lua";
const TEMPLATE: &str = include_str!("../../templates/config.lua");

enum Args {
    Exit,
    Arguments(Vec<String>),
    Error(MainError),
}

fn main() -> Result<(), MainError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let arguments = match process_args() {
        Args::Exit => return Ok(()),
        Args::Arguments(v) => v,
        Args::Error(e) => return Err(e),
    };

    let config = load_config(arguments.get(2))?;

    let mut window_manager = match sockwm::window_manager::WindowManager::new(config) {
        Ok(wm) => wm,
        Err(e) => return Err(MainError::CouldNotStartWm(e)),
    };

    let result = window_manager.run();
    window_manager.cleanup();

    result.map_err(MainError::WmError)
}

fn load_config(config_path: Option<&String>) -> Result<sockwm::Config, MainError> {
    let path = match config_path {
        None => {
            let config_dir = get_config_path()?;
            let config_path = config_dir.join(CONFIG_FILE);
            if !config_path.exists() {
                // First run without a config: the compiled-in template is
                // the config.
                return parse_template();
            }
            config_path
        }
        Some(p) => PathBuf::from(p),
    };

    let config_string = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => return Err(MainError::FailedReadConfig(e)),
    };

    let config_directory = path.parent();

    let mut config = match sockwm::config::parse_lua_config(&config_string, config_directory) {
        Ok(config) => config,
        Err(warning) => {
            tracing::warn!("config error, falling back to defaults: {warning}");
            parse_template()?
        }
    };
    config.path = Some(path);
    Ok(config)
}

fn parse_template() -> Result<sockwm::Config, MainError> {
    sockwm::config::parse_lua_config(TEMPLATE, None).map_err(MainError::FailedReadConfigTemplate)
}

fn init_config() -> Result<(), MainError> {
    let config_directory = get_config_path()?;
    if let Err(e) = std::fs::create_dir_all(&config_directory) {
        return Err(MainError::CouldNotCreateConfigDir(e));
    }

    let config_path = config_directory.join(CONFIG_FILE);
    if let Err(e) = std::fs::write(&config_path, TEMPLATE) {
        return Err(MainError::CouldNotWriteConfig(e));
    }

    println!("Config created at {:?}", config_path);
    println!("Edit the file and restart sockwm to apply changes.");

    Ok(())
}

fn get_config_path() -> Result<PathBuf, MainError> {
    match dirs::config_dir() {
        Some(p) => Ok(p.join("sockwm")),
        None => Err(MainError::NoConfigDir),
    }
}

fn print_help() {
    println!("sockwm - a minimal window manager with a socket control plane\n");
    println!("USAGE:");
    println!("    sockwm [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --init              Create default config in ~/.config/sockwm/config.lua");
    println!("    --config <PATH>     Use custom config file");
    println!("    --version           Print version information");
    println!("    --help              Print this help message\n");
    println!("CONTROL:");
    println!("    External tools talk to the manager over a Unix socket");
    println!("    (default /tmp/sockwm.sock). A request is two newline-separated");
    println!("    fields: a command id (0 list, 1 select, 2 dump, 3 quit) and an");
    println!("    optional payload; the response ends when the connection closes.");
}

fn process_args() -> Args {
    let mut args = std::env::args();
    let name = match args.next() {
        Some(n) => n,
        None => return Args::Error(MainError::NoProgramName),
    };
    let switch = args.next();
    let path = args.next();

    let switch = match switch {
        Some(s) => s,
        None => return Args::Arguments(vec![name]),
    };

    match switch.as_str() {
        "--version" => {
            println!("{name} {}", env!("CARGO_PKG_VERSION"));
            Args::Exit
        }
        "--help" => {
            print_help();
            Args::Exit
        }
        "--init" => match init_config() {
            Ok(_) => Args::Exit,
            Err(e) => Args::Error(e),
        },
        "--config" => match check_custom_config(path) {
            Ok(p) => Args::Arguments(vec![name, switch, p]),
            Err(e) => Args::Error(e),
        },
        _ => Args::Error(MainError::InvalidArguments),
    }
}

fn check_custom_config(path: Option<String>) -> Result<String, MainError> {
    let path = match path {
        Some(p) => p,
        None => {
            return Err(MainError::NoConfigPath);
        }
    };

    match Path::new(&path).try_exists() {
        Ok(true) => Ok(path),
        Ok(false) => Err(MainError::BadConfigPath),
        Err(e) => Err(MainError::FailedCheckExist(e)),
    }
}
