use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum X11Error {
    #[error("could not connect to the X server: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),
    #[error("X connection dropped: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),
    #[error("X request failed: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),
    #[error("ran out of X resource ids: {0}")]
    Ids(#[from] x11rb::errors::ReplyOrIdError),
    #[error("could not open the Xlib display")]
    DisplayOpenFailed,
    #[error("could not load font '{0}'")]
    FontLoadFailed(String),
    #[error("could not create an Xft draw surface")]
    DrawCreateFailed,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("could not bind control socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not set control socket permissions at {path}: {source}")]
    Permissions {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum WmError {
    #[error(transparent)]
    X11(#[from] X11Error),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("another window manager is already running")]
    OtherWmRunning,
    #[error("unrecoverable X error: {0}")]
    FatalXError(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// x11rb request helpers return these directly all over the manager; funnel
// them through X11Error so call sites can keep using `?`.
impl From<x11rb::errors::ConnectionError> for WmError {
    fn from(error: x11rb::errors::ConnectionError) -> Self {
        WmError::X11(X11Error::Connection(error))
    }
}

impl From<x11rb::errors::ReplyError> for WmError {
    fn from(error: x11rb::errors::ReplyError) -> Self {
        WmError::X11(X11Error::Reply(error))
    }
}

impl From<x11rb::errors::ReplyOrIdError> for WmError {
    fn from(error: x11rb::errors::ReplyOrIdError) -> Self {
        WmError::X11(X11Error::Ids(error))
    }
}

impl From<x11rb::errors::ConnectError> for WmError {
    fn from(error: x11rb::errors::ConnectError) -> Self {
        WmError::X11(X11Error::Connect(error))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("invalid modifier: {0}")]
    InvalidModkey(String),
}

#[derive(Debug, Error)]
pub enum MainError {
    #[error("could not start the window manager: {0}")]
    CouldNotStartWm(WmError),
    #[error(transparent)]
    WmError(WmError),
    #[error("could not determine a config directory")]
    NoConfigDir,
    #[error("could not create config directory: {0}")]
    CouldNotCreateConfigDir(std::io::Error),
    #[error("could not write config file: {0}")]
    CouldNotWriteConfig(std::io::Error),
    #[error("could not read config file: {0}")]
    FailedReadConfig(std::io::Error),
    #[error("built-in config template is broken: {0}")]
    FailedReadConfigTemplate(ConfigError),
    #[error("--config requires a path")]
    NoConfigPath,
    #[error("no config file at the given path")]
    BadConfigPath,
    #[error("could not check config path: {0}")]
    FailedCheckExist(std::io::Error),
    #[error("usage: sockwm [--init | --config <path> | --version | --help]")]
    InvalidArguments,
    #[error("missing program name in argv")]
    NoProgramName,
}
