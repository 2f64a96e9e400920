mod echo_demo;
mod readline_demo;
mod userdemo;

pub(crate) use echo_demo::run_user_mode_echo_demo;
pub(crate) use readline_demo::run_user_mode_readline_demo;
pub(crate) use userdemo::run_user_mode_serial_demo;
