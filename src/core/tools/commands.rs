use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::error::{FinderError, Result};
use super::super::scanner::relative_path;
use super::super::validation::resolve_inside;
use super::{optional_str, ToolContext, ToolHandler, ToolOutput};

const MANIFEST_DEPTH: usize = 3;

/// A check the project itself defines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectCommand {
    /// lint, typecheck, build or test
    pub kind: String,
    pub command: String,
    /// Manifest the command was found in
    pub source: String,
}

/// Discover lint / typecheck / build / test commands from manifests under `dir`.
pub fn discover_commands(root: &Path, dir: &Path, excluded: &[String]) -> Vec<ProjectCommand> {
    let mut commands = Vec::new();
    let walker = WalkDir::new(dir)
        .max_depth(MANIFEST_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || !(name.starts_with('.') || excluded.iter().any(|x| x == name.as_ref()))
        });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(source) = relative_path(root, path) else { continue };
        let manifest_dir = path.parent().and_then(|p| relative_path(root, p));
        let prefix = manifest_dir.map(|d| format!("cd {} && ", d)).unwrap_or_default();
        let name = entry.file_name().to_string_lossy().to_string();

        let found = match name.as_str() {
            "package.json" => from_package_json(path),
            "go.mod" => vec![
                ("build", "go build ./...".to_string()),
                ("lint", "go vet ./...".to_string()),
                ("test", "go test ./...".to_string()),
            ],
            "pyproject.toml" | "setup.cfg" | "requirements.txt" => from_python_manifest(path),
            "Makefile" => from_makefile(path),
            _ => Vec::new(),
        };

        for (kind, command) in found {
            let command = format!("{}{}", prefix, command);
            if !commands.iter().any(|c: &ProjectCommand| c.command == command) {
                commands.push(ProjectCommand {
                    kind: kind.to_string(),
                    command,
                    source: source.clone(),
                });
            }
        }
    }
    commands
}

fn from_package_json(path: &Path) -> Vec<(&'static str, String)> {
    let Some(manifest) = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok())
    else {
        return Vec::new();
    };
    let dir = path.parent().unwrap_or(Path::new("."));
    let runner = if dir.join("pnpm-lock.yaml").exists() {
        "pnpm run"
    } else if dir.join("yarn.lock").exists() {
        "yarn"
    } else {
        "npm run"
    };

    let mut found = Vec::new();
    let mut has_typecheck = false;
    if let Some(scripts) = manifest.get("scripts").and_then(|s| s.as_object()) {
        for name in scripts.keys() {
            let kind = match name.as_str() {
                "lint" | "lint:check" | "eslint" => "lint",
                "typecheck" | "type-check" | "tsc" | "check-types" | "check" => "typecheck",
                "build" => "build",
                "test" | "test:unit" => "test",
                _ => continue,
            };
            has_typecheck |= kind == "typecheck";
            found.push((kind, format!("{} {}", runner, name)));
        }
    }
    if !has_typecheck && dir.join("tsconfig.json").exists() {
        found.push(("typecheck", "npx tsc --noEmit".to_string()));
    }
    found
}

fn from_python_manifest(path: &Path) -> Vec<(&'static str, String)> {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    let mut found = Vec::new();
    if text.contains("ruff") {
        found.push(("lint", "ruff check .".to_string()));
    } else if text.contains("flake8") {
        found.push(("lint", "flake8".to_string()));
    }
    if text.contains("mypy") {
        found.push(("typecheck", "mypy .".to_string()));
    }
    if text.contains("pytest") {
        found.push(("test", "python -m pytest".to_string()));
    }
    found
}

fn from_makefile(path: &Path) -> Vec<(&'static str, String)> {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    let mut found = Vec::new();
    for line in text.lines() {
        let Some((target, _)) = line.split_once(':') else { continue };
        if line.starts_with(char::is_whitespace) || target.contains(['=', ' ', '$']) {
            continue;
        }
        let kind = match target {
            "lint" | "vet" => "lint",
            "typecheck" | "check" => "typecheck",
            "build" => "build",
            "test" => "test",
            _ => continue,
        };
        found.push((kind, format!("make {}", target)));
    }
    found
}

pub struct GetProjectCommandsTool;

#[async_trait]
impl ToolHandler for GetProjectCommandsTool {
    fn name(&self) -> &str {
        "get_project_commands"
    }

    fn description(&self) -> &str {
        "Discover the project's lint, typecheck, build and test commands from package.json, go.mod, \
         Python manifests and Makefiles. Use them as validation_commands for propose_edits."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subdir": { "type": "string", "description": "Only look under this directory" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let dir = match optional_str(&args, "subdir") {
            Some(subdir) => resolve_inside(&ctx.root, subdir)?,
            None => ctx.root.clone(),
        };
        if !dir.is_dir() {
            return Err(FinderError::Tool(format!("Not a directory: {}", dir.display())));
        }

        let commands = discover_commands(&ctx.root, &dir, &ctx.config.project.exclude_dirs);
        if commands.is_empty() {
            return Ok(ToolOutput::text("No project commands found."));
        }
        let mut out = String::from("Project commands:\n");
        for command in &commands {
            out.push_str(&format!("- [{}] {} (from {})\n", command.kind, command.command, command.source));
        }
        Ok(ToolOutput::text(out))
    }
}
