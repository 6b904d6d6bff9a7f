pub(crate) mod kill;
pub(crate) mod run_cmd;
pub(crate) mod show_config;
