//! `lantern config`: configuration management commands.

use lantern_config::AppConfig;

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ok  Config parsed and validated");

            let mut warnings = Vec::new();
            if config.provider.api_key.is_none() {
                warnings.push("No provider API key (set LANTERN_API_KEY or OPENAI_API_KEY)");
            }
            if config.search.api_key.is_none() || config.search.engine_id.is_none() {
                warnings.push("Web search disabled (set GOOGLE_API_KEY and GOOGLE_CSE_ID)");
            }
            if config.fetcher.render_endpoint.is_none() {
                warnings.push("No render endpoint, script-heavy pages may come back empty");
            }
            for w in &warnings {
                println!("   !   {w}");
            }

            println!();
            println!("   Model:      {}", config.provider.model);
            println!("   Memory:     {}", config.memory.backend);
            println!("   Budget:     {} chars", config.context.budget_chars);
            println!(
                "   Crawl:      standard {}/day, elevated {}/day",
                config.crawl.standard.max_calls_per_day, config.crawl.elevated.max_calls_per_day
            );
            println!("   Intervene:  level {}/10", config.intervention.level);
        }
        Err(e) => {
            println!("   error  {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    // Secrets never leave the process
    for secret in [&mut config.provider.api_key, &mut config.search.api_key] {
        if secret.is_some() {
            *secret = Some("***".into());
        }
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = lantern_config::AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains(".lantern"));
    }
}
