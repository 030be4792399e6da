use anyhow::Result;

use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::provider::{detect_provider, env_present, provider_label};

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    let checks = [
        ("GOOGLE_API_KEY", env_present("GOOGLE_API_KEY")),
        ("OPENAI_API_KEY", env_present("OPENAI_API_KEY")),
        ("OPENAI_BASE_URL", env_present("OPENAI_BASE_URL")),
        ("ORACLE_SERVER_AUTH_TOKEN", env_present("ORACLE_SERVER_AUTH_TOKEN")),
    ];

    println!("Provider environment check:");
    for (key, ok) in checks {
        let status = if ok { "set" } else { "missing" };
        println!("- {key}: {status}");
    }

    match cfg.provider {
        Provider::Auto => match detect_provider() {
            Some(provider) => println!("Auto provider resolution: {}", provider_label(provider)),
            None => {
                println!("Auto provider resolution: none");
                println!("Tip: export GOOGLE_API_KEY or OPENAI_API_KEY, or run with --provider mock");
            }
        },
        provider => println!("Provider pinned: {}", provider_label(provider)),
    }

    println!(
        "Knowledge directory: {} ({})",
        cfg.knowledge_dir.display(),
        if cfg.knowledge_dir.is_dir() { "found" } else { "missing" }
    );
    let mut knowledge_files = vec![
        ("user profile".to_string(), cfg.user_profile_file.clone()),
        ("oracle persona".to_string(), cfg.oracle_persona_file.clone()),
    ];
    for persona in &cfg.personas {
        match persona.persona_file.clone() {
            Some(file) => knowledge_files.push((format!("persona {}", persona.id), file)),
            None => println!("- persona {}: no file configured, fallback text in use", persona.id),
        }
    }
    for (label, file) in knowledge_files {
        let path = cfg.knowledge_path(&file);
        let status = if path.is_file() {
            "found"
        } else {
            "missing, fallback text in use"
        };
        println!("- {label}: {} ({status})", path.display());
    }

    println!(
        "Lead agent: {} | Personas: {}",
        cfg.lead_agent,
        cfg.personas
            .iter()
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Timezone: {} (valid)", cfg.timezone);
    println!(
        "Loop: max_iterations={} history_window={} parse_retries={} classifier={:?}",
        cfg.max_iterations, cfg.history_window, cfg.parse_retries, cfg.classifier
    );
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );

    Ok(())
}
