use regex::Regex;

use super::{collect_captures, push_unique, ExtractedSymbols, SymbolExtractor};

/// Go source extractor
pub struct GoExtractor {
    single_import: Regex,
    import_block: Regex,
    quoted: Regex,
    functions: Regex,
}

impl GoExtractor {
    pub fn new() -> Self {
        Self {
            single_import: Regex::new(r#"(?m)^import\s+(?:\w+\s+)?"([^"]+)""#).expect("import regex"),
            import_block: Regex::new(r"(?s)\bimport\s*\((.*?)\)").expect("import block regex"),
            quoted: Regex::new(r#""([^"]+)""#).expect("quoted regex"),
            functions: Regex::new(r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*[\[(]").expect("func regex"),
        }
    }

    fn collect_types(&self, content: &str, symbols: &mut ExtractedSymbols) {
        let mut in_group = false;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("type (") {
                in_group = true;
                continue;
            }
            if in_group && trimmed == ")" {
                in_group = false;
                continue;
            }
            let decl = if let Some(rest) = trimmed.strip_prefix("type ") {
                rest
            } else if in_group && line.starts_with(char::is_whitespace) {
                trimmed
            } else {
                continue;
            };

            let mut parts = decl.split_whitespace();
            let Some(name) = parts.next() else { continue };
            let name = name.split('[').next().unwrap_or(name);
            match parts.next() {
                Some(kind) if kind.starts_with("struct") => push_unique(&mut symbols.classes, name),
                Some(kind) if kind.starts_with("interface") => push_unique(&mut symbols.interfaces, name),
                Some(_) => push_unique(&mut symbols.types, name),
                None => {}
            }
        }
    }
}

impl Default for GoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolExtractor for GoExtractor {
    fn extract(&self, content: &str) -> ExtractedSymbols {
        let mut symbols = ExtractedSymbols::default();

        collect_captures(&self.single_import, content, &mut symbols.imports);
        for block in self.import_block.captures_iter(content) {
            if let Some(body) = block.get(1) {
                collect_captures(&self.quoted, body.as_str(), &mut symbols.imports);
            }
        }

        collect_captures(&self.functions, content, &mut symbols.functions);
        self.collect_types(content, &mut symbols);

        let exported: Vec<String> = symbols
            .functions
            .iter()
            .chain(symbols.classes.iter())
            .chain(symbols.interfaces.iter())
            .chain(symbols.types.iter())
            .filter(|name| name.starts_with(|c: char| c.is_ascii_uppercase()))
            .cloned()
            .collect();
        for name in exported {
            push_unique(&mut symbols.exports, &name);
        }

        symbols
    }

    fn file_extensions(&self) -> &[&str] {
        &["go"]
    }

    fn language_name(&self) -> &str {
        "go"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_file() {
        let source = r#"package user

import (
	"context"
	db "example.com/app/internal/storage"
)

type Store interface {
	Get(ctx context.Context, id string) (*User, error)
}

type User struct {
	ID string
}

type ID string

func NewService(s Store) *Service { return &Service{} }

func (s *Service) find(id string) {}
"#;
        let s = GoExtractor::new().extract(source);
        assert_eq!(s.imports, vec!["context", "example.com/app/internal/storage"]);
        assert_eq!(s.interfaces, vec!["Store"]);
        assert_eq!(s.classes, vec!["User"]);
        assert_eq!(s.types, vec!["ID"]);
        assert_eq!(s.functions, vec!["NewService", "find"]);
        assert_eq!(s.exports, vec!["NewService", "User", "Store", "ID"]);
    }
}
