use regex::Regex;

use super::{collect_captures, compile, push_unique, ExtractedSymbols, SymbolExtractor};

/// JavaScript / TypeScript / Vue single-file component extractor
pub struct ScriptExtractor {
    script_block: Regex,
    imports: Vec<Regex>,
    named_exports: Regex,
    export_lists: Regex,
    default_export: Regex,
    functions: Regex,
    arrow_functions: Regex,
    classes: Regex,
    interfaces: Regex,
    types: Regex,
    hook_name: Regex,
}

impl ScriptExtractor {
    pub fn new() -> Self {
        Self {
            script_block: Regex::new(r"(?s)<script\b[^>]*>(.*?)</script>").expect("script block regex"),
            imports: compile(&[
                r#"(?m)^\s*import\s+(?:type\s+)?(?:[\w*$\s{},]+?\s+from\s+)?['"]([^'"]+)['"]"#,
                r#"(?m)^\s*export\s+(?:type\s+)?(?:\*(?:\s+as\s+\w+)?|\{[^}]*\})\s+from\s+['"]([^'"]+)['"]"#,
                r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
                r#"\bimport\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
            ]),
            named_exports: Regex::new(
                r"(?m)^\s*export\s+(?:declare\s+)?(?:async\s+)?(?:function\*?|const|let|var|class|abstract\s+class|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
            )
            .expect("named export regex"),
            export_lists: Regex::new(r"(?m)^\s*export\s+(?:type\s+)?\{([^}]*)\}").expect("export list regex"),
            default_export: Regex::new(
                r"(?m)^\s*export\s+default\s+(?:async\s+)?(?:(?:function\*?|class)\s+([A-Za-z_$][\w$]*)|([A-Za-z_$][\w$]*)\s*;?\s*$)?",
            )
            .expect("default export regex"),
            functions: Regex::new(
                r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)",
            )
            .expect("function regex"),
            arrow_functions: Regex::new(
                r"(?m)^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::\s*[^=]+)?=>",
            )
            .expect("arrow function regex"),
            classes: Regex::new(
                r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)",
            )
            .expect("class regex"),
            interfaces: Regex::new(r"(?m)^\s*(?:export\s+)?(?:declare\s+)?interface\s+([A-Za-z_$][\w$]*)")
                .expect("interface regex"),
            types: Regex::new(r"(?m)^\s*(?:export\s+)?(?:declare\s+)?type\s+([A-Za-z_$][\w$]*)\s*(?:<[^=]*>)?\s*=")
                .expect("type regex"),
            hook_name: Regex::new(r"^use[A-Z0-9]").expect("hook regex"),
        }
    }

    /// Script region of a file: the `<script>` blocks of a Vue component, or the whole text
    pub fn script_region<'a>(&self, content: &'a str) -> std::borrow::Cow<'a, str> {
        if content.contains("<template") || content.contains("<script") {
            let blocks: Vec<&str> = self
                .script_block
                .captures_iter(content)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                .collect();
            if !blocks.is_empty() {
                return std::borrow::Cow::Owned(blocks.join("\n"));
            }
            if content.trim_start().starts_with('<') {
                return std::borrow::Cow::Borrowed("");
            }
        }
        std::borrow::Cow::Borrowed(content)
    }
}

impl Default for ScriptExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolExtractor for ScriptExtractor {
    fn extract(&self, content: &str) -> ExtractedSymbols {
        let script = self.script_region(content);
        let script = script.as_ref();
        let mut symbols = ExtractedSymbols::default();

        for re in &self.imports {
            collect_captures(re, script, &mut symbols.imports);
        }

        collect_captures(&self.named_exports, script, &mut symbols.exports);
        for caps in self.export_lists.captures_iter(script) {
            let Some(list) = caps.get(1) else { continue };
            for item in list.as_str().split(',') {
                let item = item.trim().trim_start_matches("type ").trim();
                let name = match item.split_once(" as ") {
                    Some((_, alias)) => alias.trim(),
                    None => item,
                };
                push_unique(&mut symbols.exports, name);
            }
        }
        for caps in self.default_export.captures_iter(script) {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("default");
            push_unique(&mut symbols.exports, name);
        }
        // `export default {` in an SFC script block
        if symbols.exports.is_empty() && script.contains("export default") {
            push_unique(&mut symbols.exports, "default");
        }

        collect_captures(&self.functions, script, &mut symbols.functions);
        collect_captures(&self.arrow_functions, script, &mut symbols.functions);
        collect_captures(&self.classes, script, &mut symbols.classes);
        collect_captures(&self.interfaces, script, &mut symbols.interfaces);
        collect_captures(&self.types, script, &mut symbols.types);

        symbols.hooks = symbols
            .functions
            .iter()
            .filter(|name| self.hook_name.is_match(name))
            .cloned()
            .collect();

        symbols
    }

    fn file_extensions(&self) -> &[&str] {
        &["ts", "tsx", "js", "jsx", "mjs", "cjs", "vue"]
    }

    fn language_name(&self) -> &str {
        "script"
    }
}
