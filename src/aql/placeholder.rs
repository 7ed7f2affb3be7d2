// =============================================================================
// AQL Placeholder Scanner
// =============================================================================
// Finds `@name` bind parameter references in a query template. String
// literals, quoted attribute names and comments are skipped, so an `@` inside
// `"user@example.org"` is not a placeholder.

use indexmap::IndexSet;

/// How a `@` reference in a template was classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// `@name`, a value bind parameter
    Value,
    /// `@@name`, a collection bind parameter
    Collection,
    /// `@` not followed by a bind name (for example `@_x` or a lone `@`)
    Malformed,
}

/// One placeholder occurrence in a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Identifier after the sigil(s); empty for a lone `@`
    pub name: String,
    /// Byte offset of the first `@`
    pub offset: usize,
    pub kind: PlaceholderKind,
}

impl Placeholder {
    /// The placeholder as written in the template
    pub fn token(&self) -> String {
        match self.kind {
            PlaceholderKind::Collection => format!("@@{}", self.name),
            PlaceholderKind::Value | PlaceholderKind::Malformed => format!("@{}", self.name),
        }
    }
}

/// Result of scanning one template
#[derive(Debug, Clone, Default)]
pub struct PlaceholderScan {
    pub placeholders: Vec<Placeholder>,
}

impl PlaceholderScan {
    /// Distinct value placeholder names in order of first occurrence
    pub fn value_names(&self) -> IndexSet<&str> {
        self.placeholders
            .iter()
            .filter(|p| p.kind == PlaceholderKind::Value)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Placeholders that cannot be mapped onto a typed value bind variable
    pub fn unsupported(&self) -> impl Iterator<Item = &Placeholder> {
        self.placeholders
            .iter()
            .filter(|p| p.kind != PlaceholderKind::Value)
    }

    pub fn references(&self, name: &str) -> bool {
        self.placeholders
            .iter()
            .any(|p| p.kind == PlaceholderKind::Value && p.name == name)
    }
}

/// Bind names may start with a digit but not with `_`
fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Scan a template for bind parameter references
pub fn scan(template: &str) -> PlaceholderScan {
    let chars: Vec<(usize, char)> = template.char_indices().collect();
    let mut placeholders = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        match ch {
            '\'' | '"' => {
                i = skip_quoted(&chars, i + 1, ch, true);
            }
            '`' | '´' => {
                i = skip_quoted(&chars, i + 1, ch, false);
            }
            '/' if next == Some('/') => {
                i += 2;
                while i < chars.len() && chars[i].1 != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() {
                    if chars[i].1 == '*' && chars.get(i + 1).map(|(_, c)| *c) == Some('/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            '@' => {
                let collection = next == Some('@');
                let mut j = if collection { i + 2 } else { i + 1 };
                let start = j;
                let starts_ident = chars.get(j).map(|(_, c)| is_ident_start(*c)).unwrap_or(false);
                // Malformed names are consumed too so the report shows the
                // whole offending token.
                while j < chars.len() && is_ident_continue(chars[j].1) {
                    j += 1;
                }
                let name: String = chars[start..j].iter().map(|(_, c)| *c).collect();
                let kind = match (starts_ident, collection) {
                    (false, _) => PlaceholderKind::Malformed,
                    (true, true) => PlaceholderKind::Collection,
                    (true, false) => PlaceholderKind::Value,
                };
                placeholders.push(Placeholder { name, offset, kind });
                i = j;
            }
            _ => i += 1,
        }
    }

    PlaceholderScan { placeholders }
}

/// Advance past a quoted section starting at `i` (just after the opening quote)
fn skip_quoted(chars: &[(usize, char)], mut i: usize, quote: char, escapes: bool) -> usize {
    while i < chars.len() {
        let ch = chars[i].1;
        if escapes && ch == '\\' {
            i += 2;
            continue;
        }
        i += 1;
        if ch == quote {
            break;
        }
    }
    i
}
