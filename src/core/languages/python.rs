use regex::Regex;

use super::{collect_captures, push_unique, ExtractedSymbols, SymbolExtractor};

/// Python module extractor
pub struct PythonExtractor {
    import: Regex,
    from_import: Regex,
    functions: Regex,
    classes: Regex,
    dunder_all: Regex,
    quoted: Regex,
}

impl PythonExtractor {
    pub fn new() -> Self {
        Self {
            import: Regex::new(r"(?m)^\s*import\s+([\w.]+)").expect("import regex"),
            from_import: Regex::new(r"(?m)^\s*from\s+([\w.]+)\s+import\b").expect("from-import regex"),
            functions: Regex::new(r"(?m)^(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("def regex"),
            classes: Regex::new(r"(?m)^class\s+([A-Za-z_]\w*)").expect("class regex"),
            dunder_all: Regex::new(r"(?s)__all__\s*=\s*[\[(](.*?)[\])]").expect("__all__ regex"),
            quoted: Regex::new(r#"['"]([A-Za-z_]\w*)['"]"#).expect("quoted name regex"),
        }
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolExtractor for PythonExtractor {
    fn extract(&self, content: &str) -> ExtractedSymbols {
        let mut symbols = ExtractedSymbols::default();

        collect_captures(&self.from_import, content, &mut symbols.imports);
        collect_captures(&self.import, content, &mut symbols.imports);
        collect_captures(&self.functions, content, &mut symbols.functions);
        collect_captures(&self.classes, content, &mut symbols.classes);

        if let Some(list) = self.dunder_all.captures(content).and_then(|c| c.get(1)) {
            collect_captures(&self.quoted, list.as_str(), &mut symbols.exports);
        } else {
            for name in symbols.functions.iter().chain(symbols.classes.iter()) {
                if !name.starts_with('_') {
                    push_unique(&mut symbols.exports, name);
                }
            }
        }

        symbols
    }

    fn file_extensions(&self) -> &[&str] {
        &["py"]
    }

    fn language_name(&self) -> &str {
        "python"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_module() {
        let source = r#"from .models import User
import os
from app.services import billing

class UserService:
    def find(self, user_id):
        return None

def _private():
    pass

async def load_user(user_id):
    return UserService().find(user_id)
"#;
        let s = PythonExtractor::new().extract(source);
        assert_eq!(s.imports, vec![".models", "app.services", "os"]);
        assert_eq!(s.classes, vec!["UserService"]);
        assert_eq!(s.functions, vec!["_private", "load_user"]);
        assert_eq!(s.exports, vec!["load_user", "UserService"]);
    }

    #[test]
    fn test_dunder_all_wins() {
        let source = "__all__ = ['public_api']\n\ndef public_api():\n    pass\n\ndef other():\n    pass\n";
        let s = PythonExtractor::new().extract(source);
        assert_eq!(s.exports, vec!["public_api"]);
    }
}
