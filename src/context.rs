//! System instruction assembly
//!
//! The live session's system instruction is built once per connect from the
//! persona prompt plus the current time, earlier session summaries, extra
//! knowledge and the personality mix. The remote endpoint rejects rich text
//! in this field, so the result is always passed through [`strip_markdown`].

use std::fmt::Write as _;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use regex::Regex;

use crate::config::{PersonaConfig, PersonalityMix};
use crate::{Error, Result};

/// Instruction used when the full setup is rejected as invalid
pub const MINIMAL_INSTRUCTION: &str =
    "You are Dr. Snuggles. You are helpful, sarcastic, and scientific. Keep answers short.";

/// Built-in persona when no prompt file is configured
pub const DEFAULT_PERSONA: &str = "\
You are Dr. Snuggles, a voice assistant with the manner of an eccentric, \
well-read scientist. You speak in short, conversational sentences because \
everything you say is read aloud. You are warm but dry, and you enjoy \
puncturing bad reasoning with a good question. When you do not know \
something, say so plainly. Never use lists, headings or other formatting.";

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid regex"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").expect("valid regex"));
static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").expect("valid regex"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Remove bold, italic, header and inline-code markers and collapse runs of
/// three or more newlines to two
#[must_use]
pub fn strip_markdown(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Supplies the persona and memory text for a new session
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Context for a session, optionally focused on `query`
    ///
    /// # Errors
    ///
    /// Returns error if the context cannot be assembled
    async fn system_context(&self, query: &str) -> Result<String>;
}

/// A fixed context string
#[derive(Debug, Clone)]
pub struct StaticContext(pub String);

#[async_trait]
impl ContextProvider for StaticContext {
    async fn system_context(&self, _query: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Assembles the instruction text from its parts
#[derive(Debug, Clone)]
pub struct InstructionBuilder<'a> {
    persona: &'a str,
    now: DateTime<Local>,
    summaries: &'a [String],
    knowledge: Option<&'a str>,
    personality: Option<PersonalityMix>,
}

impl<'a> InstructionBuilder<'a> {
    #[must_use]
    pub fn new(persona: &'a str) -> Self {
        Self {
            persona,
            now: Local::now(),
            summaries: &[],
            knowledge: None,
            personality: None,
        }
    }

    #[must_use]
    pub const fn at(mut self, now: DateTime<Local>) -> Self {
        self.now = now;
        self
    }

    #[must_use]
    pub const fn summaries(mut self, summaries: &'a [String]) -> Self {
        self.summaries = summaries;
        self
    }

    #[must_use]
    pub const fn knowledge(mut self, knowledge: Option<&'a str>) -> Self {
        self.knowledge = knowledge;
        self
    }

    #[must_use]
    pub const fn personality(mut self, mix: Option<PersonalityMix>) -> Self {
        self.personality = mix;
        self
    }

    /// Render and strip the instruction
    #[must_use]
    pub fn build(&self) -> String {
        let mut out = String::from(self.persona.trim());

        let _ = write!(
            out,
            "\n\nCurrent System Time: {}\n",
            self.now.format("%A, %B %-d, %Y at %-I:%M:%S %p %Z")
        );

        if !self.summaries.is_empty() {
            out.push_str("\nPrevious Session Context:\n");
            for (i, summary) in self.summaries.iter().enumerate() {
                let _ = writeln!(out, "Session {}: {}", i + 1, summary.trim());
            }
        }

        if let Some(knowledge) = self.knowledge.filter(|k| !k.trim().is_empty()) {
            out.push_str("\nAvailable Knowledge:\n");
            out.push_str(knowledge.trim());
            out.push('\n');
        }

        if let Some(mix) = self.personality {
            let _ = writeln!(
                out,
                "\nPersonality Mix: Comedy: {}%, Research: {}%, Energy: {}%",
                mix.comedy, mix.research, mix.energy
            );
        }

        strip_markdown(&out)
    }
}

/// Context built from the persona section of the configuration
#[derive(Debug, Clone)]
pub struct PersonaContext {
    config: PersonaConfig,
}

impl PersonaContext {
    #[must_use]
    pub const fn new(config: PersonaConfig) -> Self {
        Self { config }
    }

    async fn persona_prompt(&self) -> Result<String> {
        let Some(path) = &self.config.prompt_file else {
            return Ok(DEFAULT_PERSONA.to_string());
        };
        let prompt = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Context(format!("cannot read persona prompt {}: {e}", path.display()))
        })?;
        if prompt.trim().is_empty() {
            tracing::warn!(path = %path.display(), "persona prompt is empty, using built-in persona");
            return Ok(DEFAULT_PERSONA.to_string());
        }
        Ok(prompt)
    }
}

#[async_trait]
impl ContextProvider for PersonaContext {
    async fn system_context(&self, query: &str) -> Result<String> {
        let persona = self.persona_prompt().await?;
        let instruction = InstructionBuilder::new(&persona)
            .summaries(&self.config.session_summaries)
            .knowledge(self.config.knowledge.as_deref())
            .personality(self.config.personality)
            .build();
        tracing::debug!(
            chars = instruction.len(),
            query_chars = query.len(),
            "system context built"
        );
        Ok(instruction)
    }
}
