// src/core/engine.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use super::context_composer::ContextComposer;
use super::index::IndexBuilder;
use super::llm::{chat_with_tools, AgentObserver, ChatMessage, ChatOptions, OpenAiProvider};
use super::paths::PathResolver;
use super::pattern_graph::PatternGraphData;
use super::prompt::{PromptBuilder, INSTRUCTIONS_FILE};
use super::scheduler::{watch_project, IndexScheduler};
use super::tools::{rank_files, DiffPayload, ToolCall, ToolRegistry};

const CONFIG_FILE: &str = "codefinder.toml";

const INSTRUCTIONS_TEMPLATE: &str = "<!-- Notes for the assistant. Everything in this file is added to the system prompt. -->\n";

/// Main orchestration engine behind the CLI
pub struct Engine {
    config: Arc<Config>,
    root: PathBuf,
    index_builder: IndexBuilder,
    registry: Arc<ToolRegistry>,
}

impl Engine {
    /// Load configuration and bind to a workspace. `root` overrides `project.root`.
    pub async fn new(config_path: Option<&Path>, root: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::load_or_default(config_path)?;
        let root = root.unwrap_or_else(|| config.project.root.clone());
        let root = std::fs::canonicalize(&root)
            .map_err(|e| anyhow::anyhow!("Workspace {} is not accessible: {}", root.display(), e))?;
        config.project.root = root.clone();

        debug!("Loaded configuration: {:?}", config);

        let index_builder = IndexBuilder::new(&config.project);
        let registry = Arc::new(ToolRegistry::with_builtin_tools());

        Ok(Self {
            config: Arc::new(config),
            root,
            index_builder,
            registry,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a default config file and the state directory with an instructions stub
    pub async fn init(&self, force: bool) -> Result<()> {
        let config_path = self.root.join(CONFIG_FILE);
        if config_path.exists() && !force {
            info!("{} already exists, leaving it untouched", config_path.display());
        } else {
            let mut config = (*self.config).clone();
            config.project.root = PathBuf::from(".");
            config.save(&config_path)?;
            info!("📝 Wrote {}", config_path.display());
        }

        let state_dir = self.root.join(&self.config.project.state_dir);
        std::fs::create_dir_all(&state_dir)?;
        let instructions = state_dir.join(INSTRUCTIONS_FILE);
        if !instructions.exists() {
            std::fs::write(&instructions, INSTRUCTIONS_TEMPLATE)?;
            info!("📝 Wrote {}", instructions.display());
        }
        Ok(())
    }

    /// Build the index and pattern graph; incremental unless `full`
    pub async fn index(&self, full: bool) -> Result<()> {
        let index = if full {
            self.index_builder.build_index(&self.root)?
        } else {
            self.index_builder.update_index(&self.root)?
        };

        let graph = self.index_builder.graph_builder().load_graph(&self.root);
        info!(
            "✅ {} files indexed, {} patterns in the graph",
            index.metadata.file_count,
            graph.as_ref().map_or(0, |g: &PatternGraphData| g.files_by_pattern.len())
        );
        println!("{}", self.index_builder.index_path(&self.root).display());
        Ok(())
    }

    /// Apply a known set of changed and deleted paths
    pub async fn update(&self, changed: Vec<PathBuf>, deleted: Vec<PathBuf>) -> Result<()> {
        let absolute = |paths: Vec<PathBuf>| -> Vec<PathBuf> {
            paths
                .into_iter()
                .map(|p| if p.is_absolute() { p } else { self.root.join(p) })
                .collect()
        };
        let update = self
            .index_builder
            .update_index_for_files(&self.root, &absolute(changed), &absolute(deleted))?;

        if update.changed.is_empty() {
            info!("Index already current");
        }
        for path in &update.changed {
            println!("{}", path);
        }
        Ok(())
    }

    /// Print the project context block the assistant would see
    pub async fn context(&self, active: Option<String>, query: Option<String>) -> Result<()> {
        let composer = ContextComposer::new(&self.config);
        match composer.get_finder_project_context(&self.root, active.as_deref(), query.as_deref()) {
            Some(context) => println!("{}", context),
            None => warn!("No project context available; run `codefinder index` first"),
        }
        Ok(())
    }

    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<()> {
        let index = self.index_builder.get_or_build_index(&self.root)?;
        let resolver = PathResolver::new(&self.config.tools.deprioritized_segments);
        let limit = limit.unwrap_or(self.config.tools.search_limit);

        let hits = rank_files(&index, query, &resolver, limit);
        if hits.is_empty() {
            info!("No files match '{}'", query);
        }
        for hit in hits {
            println!("{:>6.1}  {}  [{}]", hit.score, hit.path, hit.pattern);
        }
        Ok(())
    }

    /// List the tools offered to the model
    pub fn tools(&self) -> Result<()> {
        for definition in self.registry.get_definitions() {
            let summary = definition.description.lines().next().unwrap_or_default();
            println!("{:<22} {}", definition.name, summary);
        }
        Ok(())
    }

    /// One question through the tool-calling loop
    pub async fn ask(&self, question: &str, active: Option<String>, apply: bool, cancel: CancellationToken) -> Result<()> {
        // context needs an index and graph
        self.index_builder.get_or_build_index(&self.root)?;

        let system = PromptBuilder::new(&self.config).build(Some(&self.root), active.as_deref(), Some(question));
        let messages = vec![ChatMessage::system(system), ChatMessage::user(question)];

        let provider = OpenAiProvider::new(&self.config.llm)?;
        let options = ChatOptions::new(self.config.clone(), self.registry.clone())
            .with_root(self.root.clone())
            .with_cancel(cancel)
            .with_observer(Arc::new(ConsoleObserver));

        let result = chat_with_tools(&provider, messages, &options).await;
        info!("📊 {}", result.tracker.summary());

        if result.cancelled {
            warn!("Request cancelled");
            return Ok(());
        }
        if let Some(error) = result.error {
            anyhow::bail!(error);
        }
        if let Some(content) = &result.content {
            println!("{}", content);
        }
        if result.hit_round_limit {
            warn!("Stopped at the round limit");
        }

        if let Some(diff) = &result.diff {
            self.report_diff(diff, apply)?;
        }
        Ok(())
    }

    fn report_diff(&self, diff: &DiffPayload, apply: bool) -> Result<()> {
        println!();
        for file in &diff.files {
            let status = match (&file.original, &file.validation_error) {
                (_, Some(_)) => "failed validation",
                (None, None) => "new file",
                (Some(_), None) => "modified",
            };
            println!("  {} ({})", file.path, status);
        }

        if !apply {
            info!("Re-run with --apply to write {} proposed file(s)", diff.files.len());
            return Ok(());
        }
        for file in diff.files.iter().filter(|f| f.validation_error.is_some()) {
            warn!("Applying {} although its last validation failed", file.path);
        }
        let written = diff.apply(&self.root)?;
        info!("✅ Wrote {} file(s)", written.len());

        let changed: Vec<PathBuf> = written.iter().map(|p| self.root.join(p)).collect();
        self.index_builder.update_index_for_files(&self.root, &changed, &[])?;
        Ok(())
    }

    /// Keep the index current until cancelled
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        self.index_builder.update_index(&self.root)?;

        let scheduler = IndexScheduler::spawn(
            self.root.clone(),
            self.config.project.clone(),
            Duration::from_millis(self.config.index.debounce_ms),
        );
        let mut updates = scheduler.subscribe();
        let reporter = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(changed) => info!("✅ Reindexed {}", changed.join(", ")),
                    Err(RecvError::Lagged(skipped)) => debug!("Missed {} update notice(s)", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let watched = watch_project(&self.root, &self.config.project, &scheduler, cancel).await;
        scheduler.shutdown().await;
        let _ = reporter.await;
        watched?;
        info!("Stopped watching {}", self.root.display());
        Ok(())
    }
}

/// Progress lines for a terminal session
struct ConsoleObserver;

impl AgentObserver for ConsoleObserver {
    fn on_tool_start(&self, call: &ToolCall) {
        info!("🔧 {} {}", call.name, preview(&call.arguments));
    }

    fn on_thinking(&self, thought: &str) {
        debug!("💭 {}", thought);
    }
}

fn preview(arguments: &str) -> String {
    let flat: String = arguments.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 120 {
        format!("{}…", flat.chars().take(120).collect::<String>())
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_init_writes_config_and_state() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(None, Some(dir.path().to_path_buf())).await.unwrap();
        engine.init(false).await.unwrap();

        let config = Config::load(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.project.root, PathBuf::from("."));
        assert!(dir.path().join(".codefinder").join(INSTRUCTIONS_FILE).exists());

        // a second run keeps user edits
        std::fs::write(dir.path().join(CONFIG_FILE), "[agent]\nmax_rounds = 3\n").unwrap();
        engine.init(false).await.unwrap();
        let config = Config::load(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.agent.max_rounds, 3);
    }

    #[tokio::test]
    async fn test_index_then_targeted_update() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/services/auth.ts", "export async function login() {\n  return 1\n}\n");
        let engine = Engine::new(None, Some(dir.path().to_path_buf())).await.unwrap();
        engine.index(true).await.unwrap();

        write(dir.path(), "src/services/orders.ts", "export function listOrders() {\n  return []\n}\n");
        std::fs::remove_file(dir.path().join("src/services/auth.ts")).unwrap();
        engine
            .update(
                vec![PathBuf::from("src/services/orders.ts")],
                vec![PathBuf::from("src/services/auth.ts")],
            )
            .await
            .unwrap();

        let index = engine.index_builder.get_index(engine.root()).unwrap();
        assert!(index.get("src/services/orders.ts").is_some());
        assert!(index.get("src/services/auth.ts").is_none());
    }

    #[test]
    fn test_preview_flattens_and_caps() {
        assert_eq!(preview("{\n  \"path\": \"a.ts\"\n}"), "{ \"path\": \"a.ts\" }");
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), 121);
    }
}
