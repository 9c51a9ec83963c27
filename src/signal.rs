use std::os::unix::process::CommandExt;
use std::process::Command;

use tracing::warn;

/// Children are reaped by the kernel; the manager never waits on them. Also
/// clears out any zombies inherited from the session that exec'd us.
pub fn ignore_children() {
    unsafe {
        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
        while libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) > 0 {}
    }
}

/// Run a shell command line in its own session, fully detached from the
/// manager's lifetime.
pub fn spawn_detached(command: &str) {
    spawn_detached_argv(&[
        "sh".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]);
}

pub fn spawn_detached_argv(argv: &[String]) {
    let Some((program, arguments)) = argv.split_first() else {
        return;
    };

    let mut command = Command::new(program);
    command.args(arguments);
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            libc::signal(libc::SIGCHLD, libc::SIG_DFL);
            Ok(())
        })
    };

    match command.spawn() {
        Ok(_) => {}
        Err(error) => warn!("failed to spawn {program}: {error}"),
    }
}
