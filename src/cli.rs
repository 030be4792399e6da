use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Gemini,
    Openai,
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    Keyword,
    Llm,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  oracle-calendar ask \"今日の予定は？\"\n\
  oracle-calendar --provider gemini --model gemini-2.5-flash chat\n\
  oracle-calendar --classifier llm ask \"来週の過ごし方を提案して\"\n\
  oracle-calendar classify \"Add a dentist appointment tomorrow at 10\"\n\
  oracle-calendar --max-iterations 8 --parse-retries 1 ask \"Move my 3pm meeting\"\n\
  oracle-calendar serve --host 127.0.0.1 --port 5001\n\
  oracle-calendar telemetry report --limit 2000\n\
\n\
Routing behavior:\n\
  - Requests asking for ideas or opinions are discussed by every persona and merged by the oracle.\n\
  - Requests for today's or tomorrow's schedule are answered directly from the calendar.\n\
  - Everything else runs the lead persona's tool loop.";

#[derive(Debug, Parser)]
#[command(name = "oracle-calendar")]
#[command(about = "Persona-driven calendar assistant with tool loops and oracle synthesis")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "ORACLE_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "ORACLE_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "ORACLE_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "ORACLE_CONFIG", default_value = ".oracle/config.toml")]
    pub config_path: String,

    #[arg(long, env = "ORACLE_SESSION_ID")]
    pub session_id: Option<String>,

    #[arg(long, env = "ORACLE_KNOWLEDGE_DIR")]
    pub knowledge_dir: Option<String>,

    #[arg(long, env = "ORACLE_LEAD_AGENT")]
    pub lead_agent: Option<String>,

    #[arg(long, env = "ORACLE_MAX_ITERATIONS")]
    pub max_iterations: Option<usize>,

    #[arg(long, env = "ORACLE_HISTORY_WINDOW")]
    pub history_window: Option<usize>,

    #[arg(long, env = "ORACLE_PARSE_RETRIES")]
    pub parse_retries: Option<usize>,

    #[arg(long, env = "ORACLE_CLASSIFIER", value_enum)]
    pub classifier: Option<ClassifierMode>,

    #[arg(long, env = "ORACLE_TIMEZONE")]
    pub timezone: Option<String>,

    #[arg(long, env = "ORACLE_SHOW_SENSITIVE_CONFIG", default_value_t = false)]
    pub show_sensitive_config: bool,

    #[arg(long, env = "ORACLE_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "ORACLE_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "error")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run one conversation turn and print the streamed events")]
    Ask {
        #[arg(required = true)]
        message: Vec<String>,
    },
    #[command(about = "Run interactive chat mode with session history")]
    Chat,
    #[command(about = "Print the workflow route chosen for a message")]
    Classify {
        #[arg(required = true)]
        message: Vec<String>,
    },
    #[command(about = "Run the HTTP server with the streaming chat endpoint")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5001)]
        port: u16,
    },
    #[command(about = "Validate provider environment, persona files, and timezone")]
    Doctor,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Ask { .. } => "ask".to_string(),
        Commands::Chat => "chat".to_string(),
        Commands::Classify { .. } => "classify".to_string(),
        Commands::Serve { .. } => "serve".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
    }
}
