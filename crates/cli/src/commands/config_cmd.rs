//! `agentloom config` — Print the default configuration.

use agentloom_config::AppConfig;

pub fn run() {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    print!("{}", AppConfig::default_toml());
}
