//! Heuristic architectural-role and feature-domain labelling.
//!
//! Content idioms are checked first, then directory segments, then filename
//! tokens. First match wins; nothing here does I/O.

use regex::Regex;

/// Pattern tag used when nothing matches
pub const DEFAULT_PATTERN: &str = "other";

/// Domain tag used when no feature directory can be identified
pub const GLOBAL_DOMAIN: &str = "global";

/// Labels a file's architectural role and feature domain
pub trait PatternClassifier: Send + Sync {
    fn detect_pattern(&self, path: &str, content: Option<&str>) -> String;

    fn detect_domain(&self, path: &str) -> String;
}

/// Directory segments that group files by role rather than by feature
const CONTAINER_DIRS: &[&str] = &[
    "src", "app", "lib", "pages", "views", "screens", "components", "layouts", "services", "api",
    "apis", "handlers", "controllers", "routes", "router", "routers", "middleware", "middlewares",
    "models", "entities", "schemas", "stores", "store", "hooks", "composables", "utils", "helpers",
    "types", "config", "internal", "pkg", "cmd", "modules", "features", "domains", "repositories",
    "repository", "common", "shared", "core", "server", "client", "web", "frontend", "backend",
];

/// Fallback feature keywords matched anywhere in the path
const DOMAIN_KEYWORDS: &[&str] = &[
    "auth", "login", "user", "account", "profile", "order", "payment", "billing", "invoice",
    "product", "catalog", "cart", "checkout", "admin", "dashboard", "settings", "notification",
    "message", "chat", "search", "report", "analytics", "inventory",
];

/// Directory hints, in priority order
const DIRECTORY_HINTS: &[(&str, &str)] = &[
    ("__tests__", "test"),
    ("tests", "test"),
    ("test", "test"),
    ("pages", "page"),
    ("views", "page"),
    ("screens", "page"),
    ("layouts", "layout"),
    ("components", "component"),
    ("hooks", "hook"),
    ("composables", "hook"),
    ("stores", "store"),
    ("store", "store"),
    ("services", "service"),
    ("handlers", "handler"),
    ("controllers", "controller"),
    ("routes", "router"),
    ("router", "router"),
    ("routers", "router"),
    ("middleware", "middleware"),
    ("middlewares", "middleware"),
    ("repositories", "repository"),
    ("repository", "repository"),
    ("models", "model"),
    ("entities", "model"),
    ("schemas", "schema"),
    ("api", "api"),
    ("apis", "api"),
    ("utils", "util"),
    ("helpers", "util"),
    ("types", "type"),
    ("config", "config"),
    // Go layout conventions
    ("cmd", "entrypoint"),
    ("internal", "internal"),
    ("pkg", "library"),
];

/// Filename token hints, in priority order
const FILENAME_HINTS: &[(&str, &str)] = &[
    (".test.", "test"),
    (".spec.", "test"),
    ("_test.go", "test"),
    ("test_", "test"),
    ("repository", "repository"),
    ("repo.", "repository"),
    ("service", "service"),
    ("controller", "controller"),
    ("handler", "handler"),
    ("middleware", "middleware"),
    ("router", "router"),
    ("routes", "router"),
    ("store", "store"),
    ("model", "model"),
    ("schema", "schema"),
    ("hook", "hook"),
    ("util", "util"),
    ("helper", "util"),
    ("config", "config"),
    ("types", "type"),
    ("layout", "layout"),
    ("page", "page"),
    ("component", "component"),
];

/// Regex-driven classifier; the default strategy
pub struct HeuristicClassifier {
    content_hints: Vec<(Regex, &'static str)>,
    hook_name: Regex,
}

impl HeuristicClassifier {
    pub fn new() -> Self {
        let hints: &[(&str, &'static str)] = &[
            (r"(?m)^\s*(describe|it|test)\s*\(\s*['`]", "test"),
            (r"func\s+Test[A-Z]\w*\s*\(\s*t\s+\*testing\.T\)", "test"),
            (r"@Controller\s*\(", "controller"),
            (r"@Injectable\s*\(", "service"),
            (r"@Entity\s*\(", "model"),
            (r"@Component\s*\(\s*\{", "component"),
            (r"\b(defineStore|createSlice|configureStore|createStore)\s*\(", "store"),
            (r"\b(createRouter|express\.Router|Router)\s*\(\s*\)|\bnew\s+VueRouter\s*\(", "router"),
            (r"func\s+\w+\s*\(\s*\w+\s+http\.ResponseWriter\s*,\s*\w+\s+\*http\.Request\s*\)", "handler"),
            (r"func\s*\(\s*\w+\s+\*?\w+\s*\)\s*\w+\s*\(\s*c\s+\*gin\.Context\s*\)", "handler"),
            (r"@(app|router|bp|blueprint)\.(get|post|put|patch|delete|route)\s*\(", "handler"),
            (r"class\s+\w+\s*\(\s*(models\.Model|Base|BaseModel|db\.Model)\s*\)", "model"),
            (r"export\s+default\s+defineNuxtRouteMiddleware|\(req,\s*res,\s*next\)", "middleware"),
            (r"(?m)^export\s+(default\s+)?(async\s+)?function\s+use[A-Z]\w*", "hook"),
            (r"(?m)^export\s+const\s+use[A-Z]\w*\s*=", "hook"),
        ];

        Self {
            content_hints: hints
                .iter()
                .map(|(pattern, tag)| (Regex::new(pattern).expect("content hint regex"), *tag))
                .collect(),
            hook_name: Regex::new(r"^use[A-Z]").expect("static hook regex"),
        }
    }

    fn pattern_from_directories(&self, segments: &[String]) -> Option<&'static str> {
        DIRECTORY_HINTS
            .iter()
            .find(|(dir, _)| segments.iter().any(|s| s == dir))
            .map(|(_, tag)| *tag)
    }

    fn pattern_from_filename(&self, file_name: &str) -> Option<&'static str> {
        let stem = file_name.split('.').next().unwrap_or(file_name);
        if self.hook_name.is_match(stem) {
            return Some("hook");
        }
        let lower = file_name.to_lowercase();
        FILENAME_HINTS
            .iter()
            .find(|(token, _)| lower.contains(token))
            .map(|(_, tag)| *tag)
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternClassifier for HeuristicClassifier {
    fn detect_pattern(&self, path: &str, content: Option<&str>) -> String {
        if let Some(content) = content {
            if let Some((_, tag)) = self.content_hints.iter().find(|(re, _)| re.is_match(content)) {
                return tag.to_string();
            }
        }

        let normalized = path.replace('\\', "/").to_lowercase();
        let mut segments: Vec<String> = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        let file_name = segments.pop().unwrap_or_default();

        if let Some(tag) = self.pattern_from_directories(&segments) {
            return tag.to_string();
        }

        // filename hooks are case-sensitive (useAuth.ts)
        let original_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        if let Some(tag) = self.pattern_from_filename(original_name) {
            return tag.to_string();
        }
        if let Some(tag) = self.pattern_from_filename(&file_name) {
            return tag.to_string();
        }

        DEFAULT_PATTERN.to_string()
    }

    fn detect_domain(&self, path: &str) -> String {
        let normalized = path.replace('\\', "/");
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let dirs = segments.len().saturating_sub(1);

        for i in 0..dirs {
            let current = segments[i].to_lowercase();
            if !CONTAINER_DIRS.contains(&current.as_str()) {
                continue;
            }
            if i + 1 < dirs {
                let next = segments[i + 1];
                if !CONTAINER_DIRS.contains(&next.to_lowercase().as_str()) {
                    return next.to_lowercase();
                }
            }
        }

        let lower = normalized.to_lowercase();
        DOMAIN_KEYWORDS
            .iter()
            .find(|keyword| lower.contains(*keyword))
            .map(|keyword| keyword.to_string())
            .unwrap_or_else(|| GLOBAL_DOMAIN.to_string())
    }
}

/// One-line description of a pattern tag, for prompt catalogues
pub fn describe_pattern(pattern: &str) -> &'static str {
    match pattern {
        "page" => "Route-level screen or view composed from components",
        "layout" => "Shared page chrome wrapping routed content",
        "component" => "Reusable UI building block",
        "hook" => "Reusable stateful logic (useX hooks / composables)",
        "store" => "Client-side state container",
        "service" => "Business logic or remote API access layer",
        "api" => "API client or endpoint definitions",
        "handler" => "Request handler bound to a route",
        "controller" => "Controller mapping requests to services",
        "router" => "Route table and navigation setup",
        "middleware" => "Request/response interceptor",
        "model" => "Data model or persistent entity",
        "repository" => "Persistence access for a model",
        "schema" => "Validation or serialization schema",
        "util" => "Stateless helper functions",
        "type" => "Shared type declarations",
        "config" => "Configuration and constants",
        "entrypoint" => "Executable entry point (cmd/)",
        "internal" => "Private application package (internal/)",
        "library" => "Reusable public package (pkg/)",
        "test" => "Automated tests",
        _ => "Uncategorized source file",
    }
}
