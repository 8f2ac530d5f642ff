use super::{json_pretty, load_config, EXIT_SUCCESS};
use std::path::Path;

pub fn run(config_path: &Path, json_output: bool) -> Result<u8, String> {
    let config = load_config(config_path)?;

    if json_output {
        println!("{}", json_pretty(&config)?);
    } else {
        println!("enclave config {} is valid", config_path.display());
        println!("  type:      {}", config.enclave.kind);
        println!("  path:      {}", config.path());
        println!("  args:      {}", config.args());
        println!("  log level: {}", config.log_level());
        println!("  devices:   {}", config.native.devices.join(", "));
        if let Some(m) = &config.native.measurement {
            println!("  measurement: {m}");
        }
        if let Some(v) = config.pal.max_api_version {
            println!("  max PAL API: {v}");
        }
    }
    Ok(EXIT_SUCCESS)
}
