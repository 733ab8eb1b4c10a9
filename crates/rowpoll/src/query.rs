//! Query specifications
//!
//! The SQL a source runs is either fixed text or an expression evaluated
//! against the [`EvaluationContext`] on every poll. Expressions may resolve
//! to any JSON value; only strings are accepted as SQL.
//!
//! ```rust,ignore
//! let fixed = QuerySpec::literal("SELECT * FROM person");
//! let by_name = QuerySpec::variable("person_query");
//! let templated = QuerySpec::template("SELECT * FROM #{table} WHERE status = 'NEW'");
//! let custom = QuerySpec::from_fn(|ctx| Ok(json!(format!("SELECT {}", 1))));
//! ```

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::context::EvaluationContext;
use crate::error::{Error, Result};

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\{([a-zA-Z_][a-zA-Z0-9_.]*)\}")
        .expect("placeholder regex pattern is invalid - this is a bug")
});

/// Something that yields the query to run, evaluated on every poll
pub trait QueryExpression: Send + Sync {
    /// Evaluate against the current context
    fn evaluate(&self, context: &EvaluationContext) -> Result<Value>;

    /// Short human-readable form for logs
    fn describe(&self) -> String {
        "<expression>".to_string()
    }
}

/// The value of a single context name
#[derive(Debug, Clone)]
pub struct VariableExpression {
    name: String,
}

impl VariableExpression {
    /// Look up `name` on every evaluation
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl QueryExpression for VariableExpression {
    fn evaluate(&self, context: &EvaluationContext) -> Result<Value> {
        context
            .lookup(&self.name)
            .ok_or_else(|| Error::expression(format!("unknown variable '{}'", self.name)))
    }

    fn describe(&self) -> String {
        format!("#{{{}}}", self.name)
    }
}

/// Text with `#{name}` placeholders filled from the context.
///
/// Strings are inserted as-is, numbers and booleans in their JSON form.
/// Null, arrays and objects cannot be inserted.
#[derive(Debug, Clone)]
pub struct TemplateExpression {
    template: String,
}

impl TemplateExpression {
    /// Create a template
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Whether `text` contains any placeholder
    pub fn has_placeholders(text: &str) -> bool {
        PLACEHOLDER_REGEX.is_match(text)
    }

    /// Placeholder names in order of appearance
    pub fn placeholders(&self) -> Vec<&str> {
        PLACEHOLDER_REGEX
            .captures_iter(&self.template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }
}

impl QueryExpression for TemplateExpression {
    fn evaluate(&self, context: &EvaluationContext) -> Result<Value> {
        let mut rendered = String::with_capacity(self.template.len());
        let mut last = 0;

        for caps in PLACEHOLDER_REGEX.captures_iter(&self.template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = context
                .lookup(name.as_str())
                .ok_or_else(|| Error::expression(format!("unknown variable '{}'", name.as_str())))?;

            rendered.push_str(&self.template[last..whole.start()]);
            match &value {
                Value::String(s) => rendered.push_str(s),
                Value::Number(_) | Value::Bool(_) => rendered.push_str(&value.to_string()),
                other => {
                    return Err(Error::expression(format!(
                        "variable '{}' cannot be inserted into a query: {}",
                        name.as_str(),
                        other
                    )))
                }
            }
            last = whole.end();
        }

        rendered.push_str(&self.template[last..]);
        Ok(Value::String(rendered))
    }

    fn describe(&self) -> String {
        self.template.clone()
    }
}

/// Adapts a closure into a [`QueryExpression`]
pub struct FnExpression<F>(F);

impl<F> FnExpression<F> {
    /// Wrap an evaluation closure
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> QueryExpression for FnExpression<F>
where
    F: Fn(&EvaluationContext) -> Result<Value> + Send + Sync,
{
    fn evaluate(&self, context: &EvaluationContext) -> Result<Value> {
        (self.0)(context)
    }
}

/// Where the SQL for each poll comes from
#[derive(Clone)]
pub enum QuerySpec {
    /// Fixed SQL text
    Literal(String),
    /// Evaluated on every poll
    Expression(Arc<dyn QueryExpression>),
}

impl QuerySpec {
    /// Fixed SQL text
    pub fn literal(sql: impl Into<String>) -> Self {
        Self::Literal(sql.into())
    }

    /// Any expression
    pub fn expression(expression: impl QueryExpression + 'static) -> Self {
        Self::Expression(Arc::new(expression))
    }

    /// The value of a context name
    pub fn variable(name: impl Into<String>) -> Self {
        Self::expression(VariableExpression::new(name))
    }

    /// SQL text with `#{name}` placeholders
    pub fn template(template: impl Into<String>) -> Self {
        Self::expression(TemplateExpression::new(template))
    }

    /// A closure over the context
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&EvaluationContext) -> Result<Value> + Send + Sync + 'static,
    {
        Self::expression(FnExpression::new(f))
    }

    /// Literal text, or a template when the text has placeholders
    pub fn parse(text: impl Into<String>) -> Self {
        let text = text.into();
        if TemplateExpression::has_placeholders(&text) {
            Self::template(text)
        } else {
            Self::Literal(text)
        }
    }

    /// Whether the SQL is re-evaluated on every poll
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Expression(_))
    }

    /// Produce the SQL text for one poll
    pub fn resolve(&self, context: &EvaluationContext) -> Result<String> {
        match self {
            Self::Literal(sql) => Ok(sql.clone()),
            Self::Expression(expression) => match expression.evaluate(context)? {
                Value::String(sql) => Ok(sql),
                other => Err(Error::query_type(&other)),
            },
        }
    }
}

impl fmt::Debug for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(sql) => f.debug_tuple("Literal").field(sql).finish(),
            Self::Expression(e) => f.debug_tuple("Expression").field(&e.describe()).finish(),
        }
    }
}

impl From<&str> for QuerySpec {
    fn from(sql: &str) -> Self {
        Self::literal(sql)
    }
}

impl From<String> for QuerySpec {
    fn from(sql: String) -> Self {
        Self::Literal(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Registry;
    use serde_json::json;

    fn context() -> EvaluationContext {
        EvaluationContext::from_registry(
            &Registry::new()
                .register("table", "person")
                .register("limit", 5)
                .register("answer", 42)
                .register("tags", json!(["a"])),
        )
    }

    #[test]
    fn test_literal_resolves_to_itself() {
        let spec = QuerySpec::from("SELECT * FROM person");
        assert!(!spec.is_dynamic());
        assert_eq!(spec.resolve(&context()).unwrap(), "SELECT * FROM person");
    }

    #[test]
    fn test_template_substitution() {
        let spec = QuerySpec::template("SELECT * FROM #{table} LIMIT #{limit}");
        assert_eq!(
            spec.resolve(&context()).unwrap(),
            "SELECT * FROM person LIMIT 5"
        );
    }

    #[test]
    fn test_template_unknown_variable() {
        let spec = QuerySpec::template("SELECT * FROM #{nope}");
        let err = spec.resolve(&context()).unwrap_err();
        assert!(matches!(err, Error::Expression(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_template_rejects_arrays() {
        let spec = QuerySpec::template("SELECT #{tags}");
        assert!(matches!(
            spec.resolve(&context()),
            Err(Error::Expression(_))
        ));
    }

    #[test]
    fn test_template_placeholders() {
        let template = TemplateExpression::new("SELECT #{a}, #{b.c} FROM t");
        assert_eq!(template.placeholders(), vec!["a", "b.c"]);
        assert!(!TemplateExpression::has_placeholders("SELECT ${a}"));
    }

    #[test]
    fn test_non_string_is_type_error() {
        let spec = QuerySpec::variable("answer");
        let err = spec.resolve(&context()).unwrap_err();
        assert!(matches!(
            err,
            Error::QueryType {
                value_type: "number",
                ..
            }
        ));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_closure_expression_sees_variables() {
        let spec = QuerySpec::from_fn(|ctx| {
            let id = ctx.lookup("id").unwrap_or(json!(0));
            Ok(json!(format!("SELECT * FROM person WHERE id = {id}")))
        });
        let ctx = context();
        ctx.set_variable("id", 7);
        assert_eq!(
            spec.resolve(&ctx).unwrap(),
            "SELECT * FROM person WHERE id = 7"
        );
    }

    #[test]
    fn test_parse_picks_variant() {
        assert!(!QuerySpec::parse("SELECT 1").is_dynamic());
        assert!(QuerySpec::parse("SELECT * FROM #{table}").is_dynamic());
        assert_eq!(
            format!("{:?}", QuerySpec::parse("SELECT #{x}")),
            "Expression(\"SELECT #{x}\")"
        );
    }
}
