//! `docshelf config` — Show the resolved configuration.

use docshelf_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_dir().join("config.toml");
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!();
    println!("  Config file: {}", path.display());
    if !path.exists() {
        println!("  (not present — defaults in effect)");
    }
    println!();
    println!("  Model:              {}", config.model);
    println!("  API key:            {}", if config.api_key.is_some() { "set" } else { "NOT SET" });
    println!("  Max context tokens: {}", config.max_context_tokens);
    println!("  Max files:          {}", config.max_files);
    println!("  Max file bytes:     {}", config.max_file_bytes);
    println!("  Cache TTL:          {}s", config.cache_ttl_secs);
    println!("  Ingest parallelism: {}", config.ingest.parallelism);
    println!("  Upload retries:     {}", config.ingest.upload_retry_limit);
    println!("  Tool loop limit:    {}", config.turn.tool_iteration_limit);
    println!();
    Ok(())
}
