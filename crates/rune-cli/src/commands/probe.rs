use super::{json_pretty, load_config, EXIT_SUCCESS};
use rune_enclave::select_backend;
use std::path::Path;

/// Run backend selection only; the bound backend is never loaded.
pub fn run(config_path: &Path, json_output: bool) -> Result<u8, String> {
    let config = load_config(config_path)?;
    let bound = select_backend(&config).map_err(|e| e.to_string())?;

    if json_output {
        let out = serde_json::json!({
            "kind": bound.kind.to_string(),
            "name": bound.backend.name(),
        });
        println!("{}", json_pretty(&out)?);
    } else {
        println!("{} ({})", bound.kind, bound.backend.name());
    }
    Ok(EXIT_SUCCESS)
}
