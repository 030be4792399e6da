use std::sync::Arc;

use anyhow::Result;

use crate::agents::oracle::{ORACLE_PERSONA_FALLBACK, Oracle};
use crate::agents::orchestrator::Orchestrator;
use crate::agents::persona::{PersonaAgent, PersonaProfile, load_text_or, load_user_profile};
use crate::agents::react::LoopSettings;
use crate::agents::tools::ToolDispatcher;
use crate::calendar::{CalendarBackend, InMemoryCalendar};
use crate::config::RuntimeConfig;
use crate::llm::LlmClient;
use crate::telemetry::TelemetrySink;
use crate::workflow::WorkflowClassifier;

/// Knowledge loaded once and shared by every orchestrator the factory builds.
pub struct OrchestratorFactory {
    cfg: RuntimeConfig,
    llm: Arc<dyn LlmClient>,
    model: String,
    calendar: Arc<dyn CalendarBackend>,
    telemetry: TelemetrySink,
    user_profile: Arc<str>,
    personas: Vec<PersonaProfile>,
    oracle_persona: String,
}

impl OrchestratorFactory {
    pub fn new(
        cfg: &RuntimeConfig,
        llm: Arc<dyn LlmClient>,
        model: &str,
        calendar: Arc<dyn CalendarBackend>,
        telemetry: TelemetrySink,
    ) -> Self {
        let personas = cfg
            .personas
            .iter()
            .map(|persona| PersonaProfile::load(cfg, persona))
            .collect::<Vec<_>>();
        let oracle_persona = load_text_or(
            &cfg.knowledge_path(&cfg.oracle_persona_file),
            ORACLE_PERSONA_FALLBACK,
        );
        tracing::info!(
            personas = personas.len(),
            lead = %cfg.lead_agent,
            llm = llm.name(),
            model = model,
            "orchestrator factory ready"
        );
        Self {
            cfg: cfg.clone(),
            llm,
            model: model.to_string(),
            calendar,
            telemetry,
            user_profile: Arc::from(load_user_profile(cfg)),
            personas,
            oracle_persona,
        }
    }

    pub fn calendar(&self) -> &Arc<dyn CalendarBackend> {
        &self.calendar
    }

    /// Builds a fresh orchestrator with its own chat sessions and history.
    pub fn build(&self, session_id: &str) -> Result<Orchestrator> {
        let telemetry = self.telemetry.for_session(session_id);
        let agents = self
            .personas
            .iter()
            .cloned()
            .map(|profile| {
                PersonaAgent::new(
                    profile,
                    self.user_profile.clone(),
                    self.llm.clone(),
                    &self.model,
                )
            })
            .collect::<Vec<_>>();

        Orchestrator::new(
            agents,
            &self.cfg.lead_agent,
            Oracle::new(&self.llm, &self.model, &self.oracle_persona),
            ToolDispatcher::new(self.calendar.clone(), telemetry.clone()),
            WorkflowClassifier::new(self.cfg.classifier, self.llm.clone(), &self.model),
            LoopSettings::from_config(&self.cfg),
            telemetry,
        )
    }
}

pub fn build_calendar(cfg: &RuntimeConfig) -> Arc<dyn CalendarBackend> {
    Arc::new(InMemoryCalendar::new(cfg.timezone))
}
