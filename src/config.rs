use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::cli::*;

pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub session_id: String,
    pub knowledge_dir: PathBuf,
    pub user_profile_file: String,
    pub oracle_persona_file: String,
    pub personas: Vec<PersonaConfig>,
    pub lead_agent: String,
    pub max_iterations: usize,
    pub history_window: usize,
    pub parse_retries: usize,
    pub classifier: ClassifierMode,
    pub timezone: Tz,
    pub show_sensitive_config: bool,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
    pub llm_timeout_secs: u64,
    pub max_prompt_chars: usize,
    pub server_session_cache_max: usize,
}

impl RuntimeConfig {
    /// Resolves a knowledge file name against the knowledge directory.
    pub fn knowledge_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.knowledge_dir.join(path)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub knowledge_dir: Option<String>,
    pub user_profile_file: Option<String>,
    pub oracle_persona_file: Option<String>,
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
    pub lead_agent: Option<String>,
    pub max_iterations: Option<usize>,
    pub history_window: Option<usize>,
    pub parse_retries: Option<usize>,
    pub classifier: Option<ClassifierMode>,
    pub timezone: Option<String>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
    pub llm_timeout_secs: Option<u64>,
    pub max_prompt_chars: Option<usize>,
}

/// One persona agent in the roster. Registration order is the order of this list.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PersonaConfig {
    pub id: String,
    pub display_name: String,
    pub persona_file: Option<String>,
    /// Persona text used when the file is missing.
    pub fallback_persona: Option<String>,
}

pub fn default_personas() -> Vec<PersonaConfig> {
    vec![
        PersonaConfig {
            id: "ak".to_string(),
            display_name: "Ark".to_string(),
            persona_file: Some("ak_persona.md".to_string()),
            fallback_persona: Some(
                "I am Ark (a-k), an AI calendar commander. I keep the user's schedule precise, \
                 verify facts with tools, and speak calmly and concisely."
                    .to_string(),
            ),
        },
        PersonaConfig {
            id: "ae".to_string(),
            display_name: "El".to_string(),
            persona_file: Some("ae_persona.md".to_string()),
            fallback_persona: Some(
                "I am El (a-e), a cheerful companion agent. I look after the user's energy, \
                 rest, and enjoyment, and I speak warmly."
                    .to_string(),
            ),
        },
    ]
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    parse_profiles(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check provider/classifier values and field names.",
            path.display()
        )
    })
}

pub fn parse_profiles(content: &str) -> Result<ProfilesFile> {
    Ok(toml::from_str::<ProfilesFile>(content)?)
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim().parse::<Tz>().map_err(|_| {
        anyhow::anyhow!(
            "invalid timezone '{}'. Use an IANA name such as Asia/Tokyo or UTC.",
            name
        )
    })
}

pub fn validate_personas(personas: &[PersonaConfig], lead_agent: &str) -> Result<()> {
    if personas.is_empty() {
        return Err(anyhow::anyhow!(
            "profile defines no personas. Add at least one [[profiles.<name>.personas]] entry."
        ));
    }

    let mut seen = BTreeSet::<&str>::new();
    for persona in personas {
        let id = persona.id.trim();
        if id.is_empty() {
            return Err(anyhow::anyhow!("persona id cannot be empty"));
        }
        if id == "orchestrator" || id == "oracle" {
            return Err(anyhow::anyhow!(
                "persona id '{}' is reserved for system speakers",
                id
            ));
        }
        if !seen.insert(id) {
            return Err(anyhow::anyhow!("duplicate persona id '{}'", id));
        }
    }

    if !seen.contains(lead_agent) {
        return Err(anyhow::anyhow!(
            "lead agent '{}' is not a configured persona. Available personas: {}",
            lead_agent,
            seen.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    Ok(())
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let provider = if cli.provider != Provider::Auto {
        cli.provider
    } else {
        profile.provider.unwrap_or(Provider::Auto)
    };

    let personas = if profile.personas.is_empty() {
        default_personas()
    } else {
        profile.personas.clone()
    };

    let lead_agent = cli
        .lead_agent
        .clone()
        .or(profile.lead_agent.clone())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| personas.first().map(|p| p.id.clone()).unwrap_or_default());
    validate_personas(&personas, &lead_agent)?;

    let timezone_name = cli
        .timezone
        .clone()
        .or(profile.timezone.clone())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
    let timezone = parse_timezone(&timezone_name)?;

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        provider,
        model: cli.model.clone().or(profile.model),
        session_id: cli
            .session_id
            .clone()
            .or(profile.session_id)
            .unwrap_or_else(|| "default-session".to_string()),
        knowledge_dir: PathBuf::from(
            cli.knowledge_dir
                .clone()
                .or(profile.knowledge_dir)
                .unwrap_or_else(|| "knowledge".to_string()),
        ),
        user_profile_file: profile
            .user_profile_file
            .unwrap_or_else(|| "user_profile.txt".to_string()),
        oracle_persona_file: profile
            .oracle_persona_file
            .unwrap_or_else(|| "oracle_persona.md".to_string()),
        personas,
        lead_agent,
        max_iterations: cli
            .max_iterations
            .or(profile.max_iterations)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
            .max(1),
        history_window: cli
            .history_window
            .or(profile.history_window)
            .unwrap_or(DEFAULT_HISTORY_WINDOW),
        parse_retries: cli.parse_retries.or(profile.parse_retries).unwrap_or(0),
        classifier: cli
            .classifier
            .or(profile.classifier)
            .unwrap_or(ClassifierMode::Keyword),
        timezone,
        show_sensitive_config: cli.show_sensitive_config,
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".oracle/telemetry/events.jsonl".to_string()),
        llm_timeout_secs: profile.llm_timeout_secs.unwrap_or(60).max(1),
        max_prompt_chars: profile.max_prompt_chars.unwrap_or(8_000),
        server_session_cache_max: 64,
    })
}
