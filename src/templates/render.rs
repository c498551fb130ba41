//! Minimal `{{var}}` / `{{#each}}` / `{{#if}}` renderer.
//!
//! Intentionally small: the template language only needs to cover prompt
//! interpolation, not general-purpose templating, so this hand-rolled
//! tokenizer/renderer stays a few hundred lines rather than pulling in a
//! full engine for three constructs. No autoescaping — targets are LLM
//! prompts, not HTML.

use std::collections::HashMap;

use serde_json::Value;

/// A variable bag passed to [`super::TemplateStore::render`]. Values are
/// stored as `serde_json::Value` so that both plain strings and the
/// `{{#each}}`-iterable lists a prompt needs (e.g. a list of result
/// snippets) share one representation.
#[derive(Debug, Clone, Default)]
pub struct Vars(HashMap<String, Value>);

impl Vars {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn insert_json(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn with_json(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert_json(key, value);
        self
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Var(String),
    Each { list_var: String, item_name: String, body: Vec<Node> },
    If { cond_var: String, body: Vec<Node> },
}

/// Parse template source into a node tree. Errors are returned as plain
/// strings describing the malformed construct; `TemplateStore::load` wraps
/// them into a `ConfigurationError`.
pub fn parse(source: &str) -> Result<ParsedTemplate, String> {
    let tokens = tokenize(source);
    let mut iter = tokens.into_iter().peekable();
    let nodes = parse_nodes(&mut iter, None)?;
    Ok(ParsedTemplate { nodes })
}

#[derive(Debug, Clone)]
enum Token {
    Text(String),
    Var(String),
    EachOpen(String, String),
    EachClose,
    IfOpen(String),
    IfClose,
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        rest = &rest[start + 2..];
        let Some(end) = rest.find("}}") else {
            // Unterminated tag: treat the rest as literal text.
            tokens.push(Token::Text(format!("{{{{{rest}")));
            rest = "";
            break;
        };
        let tag = rest[..end].trim();
        rest = &rest[end + 2..];

        if let Some(list_var) = tag.strip_prefix("#each ") {
            let (list_var, item_name) = match list_var.split_once(" as ") {
                Some((l, i)) => (l.trim().to_string(), i.trim().to_string()),
                None => (list_var.trim().to_string(), "item".to_string()),
            };
            tokens.push(Token::EachOpen(list_var, item_name));
        } else if tag == "/each" {
            tokens.push(Token::EachClose);
        } else if let Some(cond) = tag.strip_prefix("#if ") {
            tokens.push(Token::IfOpen(cond.trim().to_string()));
        } else if tag == "/if" {
            tokens.push(Token::IfClose);
        } else {
            tokens.push(Token::Var(tag.to_string()));
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    tokens
}

enum BlockKind {
    Each,
    If,
}

fn parse_nodes(
    tokens: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
    closing: Option<BlockKind>,
) -> Result<Vec<Node>, String> {
    let mut nodes = Vec::new();
    loop {
        match tokens.next() {
            None => {
                if closing.is_some() {
                    return Err("unterminated block (missing {{/each}} or {{/if}})".to_string());
                }
                return Ok(nodes);
            }
            Some(Token::Text(text)) => nodes.push(Node::Text(text)),
            Some(Token::Var(name)) => nodes.push(Node::Var(name)),
            Some(Token::EachOpen(list_var, item_name)) => {
                let body = parse_nodes(tokens, Some(BlockKind::Each))?;
                nodes.push(Node::Each {
                    list_var,
                    item_name,
                    body,
                });
            }
            Some(Token::IfOpen(cond_var)) => {
                let body = parse_nodes(tokens, Some(BlockKind::If))?;
                nodes.push(Node::If { cond_var, body });
            }
            Some(Token::EachClose) => {
                if matches!(closing, Some(BlockKind::Each)) {
                    return Ok(nodes);
                }
                return Err("unexpected {{/each}} without matching {{#each}}".to_string());
            }
            Some(Token::IfClose) => {
                if matches!(closing, Some(BlockKind::If)) {
                    return Ok(nodes);
                }
                return Err("unexpected {{/if}} without matching {{#if}}".to_string());
            }
        }
    }
}

/// Render `template` against `vars`. Returns `Err(variable_name)` for the
/// first undefined variable encountered — a render either fully succeeds
/// or fails loudly, never silently drops a placeholder.
pub fn render(template: &ParsedTemplate, vars: &Vars) -> Result<String, String> {
    let mut out = String::new();
    render_nodes(&template.nodes, vars, &mut out)?;
    Ok(trim_predictably(&out))
}

fn render_nodes(nodes: &[Node], vars: &Vars, out: &mut String) -> Result<(), String> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(name) => {
                let value = vars.get(name).ok_or_else(|| name.clone())?;
                out.push_str(&value_to_display(value));
            }
            Node::Each {
                list_var,
                item_name,
                body,
            } => {
                let value = vars.get(list_var).ok_or_else(|| list_var.clone())?;
                let Value::Array(items) = value else {
                    return Err(format!("{list_var} (expected array for #each)"));
                };
                for item in items {
                    let mut scoped = vars.clone();
                    scoped.insert_json(item_name.clone(), item.clone());
                    render_nodes(body, &scoped, out)?;
                }
            }
            Node::If { cond_var, body } => {
                let value = vars.get(cond_var).ok_or_else(|| cond_var.clone())?;
                if is_truthy(value) {
                    render_nodes(body, vars, out)?;
                }
            }
        }
    }
    Ok(())
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Collapse leading/trailing blank lines and trailing-line whitespace so
/// that a template's own indentation doesn't leak into the rendered
/// prompt, while leaving intentional blank lines between paragraphs alone.
fn trim_predictably(rendered: &str) -> String {
    rendered.trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_variable() {
        let t = parse("Hello {{name}}!").unwrap();
        let vars = Vars::new().insert("name", "world");
        assert_eq!(render(&t, &vars).unwrap(), "Hello world!");
    }

    #[test]
    fn fails_on_undefined_variable() {
        let t = parse("Hello {{name}}!").unwrap();
        let vars = Vars::new();
        assert_eq!(render(&t, &vars), Err("name".to_string()));
    }

    #[test]
    fn renders_each_block() {
        let t = parse("{{#each items}}- {{item}}\n{{/each}}").unwrap();
        let vars = Vars::new().with_json(
            "items",
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
        );
        assert_eq!(render(&t, &vars).unwrap(), "- a\n- b");
    }

    #[test]
    fn renders_if_block_when_truthy() {
        let t = parse("{{#if show}}visible{{/if}}").unwrap();
        let vars = Vars::new().with_json("show", Value::Bool(true));
        assert_eq!(render(&t, &vars).unwrap(), "visible");
    }

    #[test]
    fn skips_if_block_when_falsy() {
        let t = parse("before{{#if show}}visible{{/if}}after").unwrap();
        let vars = Vars::new().with_json("show", Value::Bool(false));
        assert_eq!(render(&t, &vars).unwrap(), "beforeafter");
    }

    #[test]
    fn unterminated_each_is_a_parse_error() {
        assert!(parse("{{#each items}}no close").is_err());
    }
}
