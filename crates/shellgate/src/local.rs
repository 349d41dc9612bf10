//! Single-user session driven by a local front-end.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use shellgate_core::{
    Assistant, AssistantContext, AssistantRequest, AssistantRequestKind, AssistantResponse,
    CommandResult, HistoryFilter, HistoryStore,
};
use shellgate_executor::Executor;

/// Entries shown by a bare `history`.
const HISTORY_LINES: usize = 20;

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Exit,
    ChangeDirectory(String),
    Export { key: String, value: String },
    Unset(String),
    /// `history [keyword]`
    History(Option<String>),
    /// `?? question`, or a bare `??` to analyse the last failure.
    Ask(Option<String>),
    Command(String),
}

impl Input {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if let Some(rest) = line.strip_prefix("??") {
            let rest = rest.trim();
            return Self::Ask((!rest.is_empty()).then(|| rest.to_string()));
        }

        let (head, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(h, r)| (h, r.trim()));
        match head {
            "exit" | "quit" if rest.is_empty() => Self::Exit,
            "cd" => Self::ChangeDirectory(if rest.is_empty() { "~".to_string() } else { unquote(rest) }),
            "history" => Self::History((!rest.is_empty()).then(|| rest.to_string())),
            "unset" if !rest.is_empty() => Self::Unset(rest.to_string()),
            "export" => match unquote(rest).split_once('=') {
                Some((key, value)) if !key.is_empty() => Self::Export {
                    key: key.to_string(),
                    value: value.to_string(),
                },
                _ => Self::Command(line.to_string()),
            },
            _ => Self::Command(line.to_string()),
        }
    }
}

fn unquote(text: &str) -> String {
    match shlex::split(text) {
        Some(words) if !words.is_empty() => words.join(" "),
        _ => text.to_string(),
    }
}

/// What a handled line produced.
#[derive(Debug)]
pub enum Outcome {
    Nothing,
    Exit,
    Result(CommandResult),
    Directory(PathBuf),
    Lines(Vec<String>),
    Answer(AssistantResponse),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Notice,
    Error,
}

impl Outcome {
    /// Lines to show for this outcome.
    #[must_use]
    pub fn display_lines(&self) -> Vec<(Tone, String)> {
        match self {
            Self::Nothing | Self::Exit => Vec::new(),
            Self::Result(result) => {
                let mut lines: Vec<(Tone, String)> = result
                    .stdout
                    .lines()
                    .map(|l| (Tone::Normal, l.to_string()))
                    .collect();
                lines.extend(result.stderr.lines().map(|l| (Tone::Error, l.to_string())));
                if !result.success() {
                    lines.push((Tone::Error, format!("[exit {}]", result.exit_code)));
                }
                lines
            }
            Self::Directory(dir) => vec![(Tone::Notice, dir.display().to_string())],
            Self::Lines(lines) => lines.iter().map(|l| (Tone::Normal, l.clone())).collect(),
            Self::Answer(answer) => {
                let mut lines: Vec<(Tone, String)> = answer
                    .content
                    .lines()
                    .map(|l| (Tone::Notice, l.to_string()))
                    .collect();
                if let Some(command) = &answer.command {
                    lines.push((Tone::Notice, format!("suggested: {command}")));
                }
                lines
            }
            Self::Error(message) => vec![(Tone::Error, message.clone())],
        }
    }
}

/// The local session: one executor plus the shared collaborators.
pub struct LocalShell {
    executor: Executor,
    history: Arc<dyn HistoryStore>,
    assistant: Arc<dyn Assistant>,
    last_result: Option<CommandResult>,
}

impl LocalShell {
    #[must_use]
    pub fn new(executor: Executor, history: Arc<dyn HistoryStore>, assistant: Arc<dyn Assistant>) -> Self {
        Self {
            executor,
            history,
            assistant,
            last_result: None,
        }
    }

    #[must_use]
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Prompt text for the next line.
    #[must_use]
    pub fn prompt(&self) -> String {
        let shown = home_relative(self.executor.current_directory());
        format!("{}:{shown}$ ", self.executor.user())
    }

    pub async fn handle(&mut self, line: &str) -> Outcome {
        match Input::parse(line) {
            Input::Empty => Outcome::Nothing,
            Input::Exit => Outcome::Exit,
            Input::ChangeDirectory(path) => match self.executor.change_directory(&path).await {
                Ok(dir) => Outcome::Directory(dir),
                Err(e) => Outcome::Error(e.to_string()),
            },
            Input::Export { key, value } => {
                self.executor.set_environment(key, value);
                Outcome::Nothing
            }
            Input::Unset(key) => {
                self.executor.remove_environment(&key);
                Outcome::Nothing
            }
            Input::History(keyword) => self.history_lines(keyword).await,
            Input::Ask(question) => self.ask(question).await,
            Input::Command(command) => {
                let result = self.executor.execute(&command).await;
                tracing::debug!(exit_code = result.exit_code, duration_ms = result.duration_ms, "Command finished");
                if let Err(e) = self.history.add_entry(&result).await {
                    tracing::warn!("Failed to record history: {e}");
                }
                self.last_result = Some(result.clone());
                Outcome::Result(result)
            }
        }
    }

    async fn history_lines(&self, keyword: Option<String>) -> Outcome {
        let filter = HistoryFilter {
            keyword,
            limit: Some(HISTORY_LINES),
            ..HistoryFilter::default()
        };
        match self.history.search(&filter).await {
            Ok(entries) => Outcome::Lines(
                entries
                    .iter()
                    .rev()
                    .map(|e| format!("{:>5}  {}", e.id, e.result.command))
                    .collect(),
            ),
            Err(e) => Outcome::Error(e.to_string()),
        }
    }

    async fn ask(&self, question: Option<String>) -> Outcome {
        let (kind, query) = match question {
            Some(query) => (AssistantRequestKind::NaturalLanguage, query),
            None => match &self.last_result {
                Some(last) if !last.success() => (AssistantRequestKind::ErrorAnalysis, last.command.clone()),
                _ => return Outcome::Error("nothing to analyse: the last command succeeded".to_string()),
            },
        };
        let request = AssistantRequest {
            kind,
            query,
            context: AssistantContext {
                last_result: self.last_result.clone(),
                working_directory: Some(self.executor.current_directory().to_path_buf()),
            },
        };
        match self.assistant.request(request).await {
            Ok(answer) => Outcome::Answer(answer),
            Err(e) => Outcome::Error(format!("assistant: {e}")),
        }
    }
}

fn home_relative(dir: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = dir.strip_prefix(&home) {
            return if rest.as_os_str().is_empty() {
                "~".to_string()
            } else {
                format!("~/{}", rest.display())
            };
        }
    }
    dir.display().to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use shellgate_core::UnconfiguredAssistant;
    use shellgate_session::history::MemoryHistory;

    use super::*;

    #[test]
    fn test_parse_builtins() {
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(Input::parse("exit"), Input::Exit);
        assert_eq!(Input::parse("cd"), Input::ChangeDirectory("~".to_string()));
        assert_eq!(
            Input::parse("cd 'My Docs'"),
            Input::ChangeDirectory("My Docs".to_string())
        );
        assert_eq!(
            Input::parse("export GREETING=\"hello world\""),
            Input::Export {
                key: "GREETING".to_string(),
                value: "hello world".to_string()
            }
        );
        assert_eq!(Input::parse("history git"), Input::History(Some("git".to_string())));
        assert_eq!(Input::parse("?? list big files"), Input::Ask(Some("list big files".to_string())));
        assert_eq!(Input::parse("??"), Input::Ask(None));
        assert_eq!(Input::parse("ls -la"), Input::Command("ls -la".to_string()));
        assert_eq!(Input::parse("exit 3"), Input::Command("exit 3".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(MemoryHistory::new());
        let mut shell = LocalShell::new(
            Executor::new(dir.path().canonicalize().unwrap()),
            Arc::clone(&history) as Arc<dyn HistoryStore>,
            Arc::new(UnconfiguredAssistant),
        );

        shell.handle("export NAME=local").await;
        let Outcome::Result(result) = shell.handle("echo $NAME").await else {
            panic!("expected a command result");
        };
        assert_eq!(result.stdout.trim(), "local");
        assert_eq!(history.len(), 1);

        let Outcome::Lines(lines) = shell.handle("history").await else {
            panic!("expected history lines");
        };
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("echo $NAME"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_cd_and_unconfigured_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut shell = LocalShell::new(
            Executor::new(root.clone()),
            Arc::new(MemoryHistory::new()),
            Arc::new(UnconfiguredAssistant),
        );

        assert!(matches!(shell.handle("cd /no/such/place").await, Outcome::Error(_)));
        assert_eq!(shell.executor().current_directory(), root);

        assert!(matches!(shell.handle("??").await, Outcome::Error(_)));
        shell.handle("false").await;
        let Outcome::Error(message) = shell.handle("??").await else {
            panic!("expected assistant error");
        };
        assert!(message.starts_with("assistant:"));
    }
}
