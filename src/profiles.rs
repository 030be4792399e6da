use anyhow::Result;

use crate::config::{ProfilesFile, RuntimeConfig};

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if profiles.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!("Provider: {:?}", cfg.provider);
    println!(
        "Model: {}",
        cfg.model.as_deref().unwrap_or("<provider-default>")
    );
    println!("Session ID: {}", cfg.session_id);
    println!("Knowledge dir: {}", cfg.knowledge_dir.display());
    println!("User profile file: {}", cfg.user_profile_file);
    println!("Oracle persona file: {}", cfg.oracle_persona_file);
    println!("Personas:");
    for persona in &cfg.personas {
        let lead = if persona.id == cfg.lead_agent { " (lead)" } else { "" };
        println!(
            "- {} \"{}\" file={}{}",
            persona.id,
            persona.display_name,
            persona.persona_file.as_deref().unwrap_or("<none>"),
            lead
        );
    }
    println!("Classifier: {:?}", cfg.classifier);
    println!("Timezone: {}", cfg.timezone);
    println!("Max iterations: {}", cfg.max_iterations);
    println!("History window: {}", cfg.history_window);
    println!("Parse retries: {}", cfg.parse_retries);
    println!("LLM timeout (secs): {}", cfg.llm_timeout_secs);
    println!("Max prompt chars: {}", cfg.max_prompt_chars);
    println!("Server session cache max: {}", cfg.server_session_cache_max);
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);
    Ok(())
}
