//! Placeholder resolution.
//!
//! A configuration value ending in `_PLACEHOLDER` asks for input. The text in
//! front of the suffix is either the placeholder's name (a bare UPPER_SNAKE
//! identifier such as `TARGET_IP`) or an embedded default (`192.168.1.10`,
//! `30`, `eth0`). Answers come from an [`AnswerSupplier`]:
//!
//! * [`InteractiveSupplier`] - prompts on the terminal
//! * [`FixedAnswers`] - `--set KEY=VALUE` / `--answers FILE`
//! * [`FailFast`] - embedded default or error, for automation

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::{self, BufRead, BufReader};
use std::thread;

use regex::Regex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use trafficgen_shared::errors::PlaceholderError;

use crate::interrupt::InterruptToken;

/// Sentinel suffix marking a value that needs resolution
pub const PLACEHOLDER_SUFFIX: &str = "_PLACEHOLDER";

/// What the text in front of the sentinel means
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Set when the prefix is a bare identifier
    pub name: Option<String>,
    /// Set when the prefix is anything else
    pub default: Option<String>,
}

/// Compiled placeholder syntax
#[derive(Debug, Clone)]
pub struct PlaceholderPattern {
    sentinel: Regex,
    identifier: Regex,
}

impl PlaceholderPattern {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            sentinel: Regex::new(r"^(?P<prefix>.*)_PLACEHOLDER$")?,
            identifier: Regex::new(r"^[A-Z][A-Z0-9_]*$")?,
        })
    }

    /// Interpret `raw`, or `None` if it is a plain value.
    pub fn parse(&self, raw: &str) -> Option<Placeholder> {
        let captures = self.sentinel.captures(raw)?;
        let prefix = captures.name("prefix").map_or("", |m| m.as_str());

        Some(if prefix.is_empty() {
            Placeholder {
                name: None,
                default: None,
            }
        } else if self.identifier.is_match(prefix) {
            Placeholder {
                name: Some(prefix.to_string()),
                default: None,
            }
        } else {
            Placeholder {
                name: None,
                default: Some(prefix.to_string()),
            }
        })
    }

    pub fn is_placeholder(&self, raw: &str) -> bool {
        self.sentinel.is_match(raw)
    }
}

/// One value that needs an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderRequest {
    /// Environment key the value belongs to
    pub key: String,
    /// The value as written, sentinel included
    pub raw: String,
    pub placeholder: Placeholder,
}

impl PlaceholderRequest {
    pub fn default_value(&self) -> Option<&str> {
        self.placeholder.default.as_deref()
    }

    fn unresolved(&self) -> PlaceholderError {
        PlaceholderError::Unresolved {
            key: self.key.clone(),
            raw: self.raw.clone(),
        }
    }
}

/// Source of answers for placeholders
pub trait AnswerSupplier: Send {
    fn answer(
        &mut self,
        request: &PlaceholderRequest,
    ) -> impl Future<Output = Result<String, PlaceholderError>> + Send;

    /// Short name for logs
    fn describe(&self) -> &'static str;
}

/// Answers from a fixed map, falling back to the embedded default.
#[derive(Debug, Clone, Default)]
pub struct FixedAnswers {
    answers: BTreeMap<String, String>,
}

impl FixedAnswers {
    pub fn new(answers: BTreeMap<String, String>) -> Self {
        Self { answers }
    }

    /// Answer for the request: by environment key first, then by placeholder name.
    fn lookup(&self, request: &PlaceholderRequest) -> Option<&String> {
        self.answers.get(&request.key).or_else(|| {
            request
                .placeholder
                .name
                .as_ref()
                .and_then(|name| self.answers.get(name))
        })
    }
}

impl AnswerSupplier for FixedAnswers {
    async fn answer(&mut self, request: &PlaceholderRequest) -> Result<String, PlaceholderError> {
        self.lookup(request)
            .cloned()
            .or_else(|| request.default_value().map(str::to_string))
            .ok_or_else(|| request.unresolved())
    }

    fn describe(&self) -> &'static str {
        "fixed answers"
    }
}

/// Embedded default or error; never asks anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFast;

impl AnswerSupplier for FailFast {
    async fn answer(&mut self, request: &PlaceholderRequest) -> Result<String, PlaceholderError> {
        request
            .default_value()
            .map(str::to_string)
            .ok_or_else(|| request.unresolved())
    }

    fn describe(&self) -> &'static str {
        "non-interactive"
    }
}

/// Read `input` line by line on a dedicated thread.
///
/// A blocked terminal read cannot be cancelled. Kept off the runtime, it never
/// holds up shutdown after an interruption; the thread dies with the process.
fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let spawned = thread::Builder::new()
        .name("placeholder-input".to_string())
        .spawn(move || {
            for line in input.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start input reader, treating input as closed: {}", e);
    }
    rx
}

/// Prompts `KEY [default]: ` and reads one line per attempt.
pub struct InteractiveSupplier<W> {
    lines: mpsc::Receiver<io::Result<String>>,
    out: W,
    interrupt: InterruptToken,
}

impl InteractiveSupplier<tokio::io::Stdout> {
    /// Prompt on the engine's own terminal.
    pub fn stdio(interrupt: InterruptToken) -> Self {
        Self::new(BufReader::new(io::stdin()), tokio::io::stdout(), interrupt)
    }
}

impl<W> InteractiveSupplier<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new<R>(input: R, out: W, interrupt: InterruptToken) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self {
            lines: spawn_line_reader(input),
            out,
            interrupt,
        }
    }

    async fn prompt(&mut self, request: &PlaceholderRequest) -> Result<(), PlaceholderError> {
        let text = match request.default_value() {
            Some(default) => format!("{} [{}]: ", request.key, default),
            None => format!("{}: ", request.key),
        };

        let input_error = |e: std::io::Error| PlaceholderError::Input {
            key: request.key.clone(),
            message: e.to_string(),
        };
        self.out.write_all(text.as_bytes()).await.map_err(input_error)?;
        self.out.flush().await.map_err(input_error)
    }
}

impl<W> AnswerSupplier for InteractiveSupplier<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn answer(&mut self, request: &PlaceholderRequest) -> Result<String, PlaceholderError> {
        let cancelled = || PlaceholderError::Cancelled {
            key: request.key.clone(),
        };

        loop {
            if self.interrupt.is_interrupted() {
                return Err(cancelled());
            }
            self.prompt(request).await?;

            let line = tokio::select! {
                _ = self.interrupt.interrupted() => return Err(cancelled()),
                line = self.lines.recv() => line,
            };

            match line {
                Some(Ok(line)) => {
                    let answer = line.trim();
                    if !answer.is_empty() {
                        return Ok(answer.to_string());
                    }
                    if let Some(default) = request.default_value() {
                        return Ok(default.to_string());
                    }
                    // No default: ask again
                }
                // Input closed: nobody left to ask
                None => {
                    return request
                        .default_value()
                        .map(str::to_string)
                        .ok_or_else(|| request.unresolved());
                }
                Some(Err(e)) => {
                    return Err(PlaceholderError::Input {
                        key: request.key.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn describe(&self) -> &'static str {
        "interactive"
    }
}

/// How answers are obtained for this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    Fixed,
    FailFast,
    Interactive,
}

impl AnswerMode {
    /// Any supplied answer wins; otherwise prompt only on a terminal.
    pub fn select(has_answers: bool, non_interactive: bool, stdin_is_terminal: bool) -> Self {
        if has_answers {
            AnswerMode::Fixed
        } else if non_interactive || !stdin_is_terminal {
            AnswerMode::FailFast
        } else {
            AnswerMode::Interactive
        }
    }
}

/// The supplier picked at startup from [`AnswerMode`]
pub enum ConfiguredSupplier {
    Interactive(InteractiveSupplier<tokio::io::Stdout>),
    Fixed(FixedAnswers),
    FailFast(FailFast),
}

impl ConfiguredSupplier {
    pub fn new(
        mode: AnswerMode,
        answers: BTreeMap<String, String>,
        interrupt: InterruptToken,
    ) -> Self {
        match mode {
            AnswerMode::Interactive => {
                ConfiguredSupplier::Interactive(InteractiveSupplier::stdio(interrupt))
            }
            AnswerMode::Fixed => ConfiguredSupplier::Fixed(FixedAnswers::new(answers)),
            AnswerMode::FailFast => ConfiguredSupplier::FailFast(FailFast),
        }
    }
}

impl AnswerSupplier for ConfiguredSupplier {
    async fn answer(&mut self, request: &PlaceholderRequest) -> Result<String, PlaceholderError> {
        match self {
            ConfiguredSupplier::Interactive(supplier) => supplier.answer(request).await,
            ConfiguredSupplier::Fixed(supplier) => supplier.answer(request).await,
            ConfiguredSupplier::FailFast(supplier) => supplier.answer(request).await,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ConfiguredSupplier::Interactive(supplier) => supplier.describe(),
            ConfiguredSupplier::Fixed(supplier) => supplier.describe(),
            ConfiguredSupplier::FailFast(supplier) => supplier.describe(),
        }
    }
}

/// A placeholder that was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlaceholder {
    pub key: String,
    pub raw: String,
    pub value: String,
}

/// An environment block with every placeholder replaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnv {
    pub values: BTreeMap<String, String>,
    pub placeholders: Vec<ResolvedPlaceholder>,
}

/// Resolves placeholders through a supplier, asking once per `(key, raw)` pair.
pub struct PlaceholderResolver<S> {
    pattern: PlaceholderPattern,
    supplier: S,
    memo: HashMap<(String, String), String>,
}

impl<S: AnswerSupplier> PlaceholderResolver<S> {
    pub fn new(supplier: S) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: PlaceholderPattern::new()?,
            supplier,
            memo: HashMap::new(),
        })
    }

    pub fn pattern(&self) -> &PlaceholderPattern {
        &self.pattern
    }

    pub fn supplier(&self) -> &S {
        &self.supplier
    }

    /// Concrete value for `raw`; plain values pass through unchanged.
    pub async fn resolve(&mut self, key: &str, raw: &str) -> Result<String, PlaceholderError> {
        let Some(placeholder) = self.pattern.parse(raw) else {
            return Ok(raw.to_string());
        };

        let memo_key = (key.to_string(), raw.to_string());
        if let Some(answer) = self.memo.get(&memo_key) {
            debug!("Reusing answer for placeholder {}", key);
            return Ok(answer.clone());
        }

        let request = PlaceholderRequest {
            key: key.to_string(),
            raw: raw.to_string(),
            placeholder,
        };
        let answer = self.supplier.answer(&request).await?;
        info!(
            "Resolved placeholder {} via {} supplier",
            key,
            self.supplier.describe()
        );
        self.memo.insert(memo_key, answer.clone());
        Ok(answer)
    }

    /// Resolve every value of an environment block, in key order.
    pub async fn resolve_env(
        &mut self,
        env: &BTreeMap<String, String>,
    ) -> Result<ResolvedEnv, PlaceholderError> {
        let mut resolved = ResolvedEnv::default();
        for (key, raw) in env {
            let value = self.resolve(key, raw).await?;
            if self.pattern.is_placeholder(raw) {
                resolved.placeholders.push(ResolvedPlaceholder {
                    key: key.clone(),
                    raw: raw.clone(),
                    value: value.clone(),
                });
            }
            resolved.values.insert(key.clone(), value);
        }
        Ok(resolved)
    }
}
