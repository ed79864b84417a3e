//! Shared minijinja setup for templates, task fields and guards

use minijinja::{Environment, UndefinedBehavior, Value as JinjaValue};
use std::path::Path;

/// Environment used to render templates and task fields
///
/// Undefined variables are errors so a typo in a template never silently
/// writes an empty value into a config file.
pub fn template_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    setup_minijinja_env(&mut env);
    env
}

/// Environment used to evaluate `when` guards; undefined names are falsy
pub fn guard_environment() -> Environment<'static> {
    let mut env = Environment::new();
    setup_minijinja_env(&mut env);
    env
}

/// Register the custom filters and functions
pub fn setup_minijinja_env(env: &mut Environment) {
    env.add_filter("basename", |value: JinjaValue| {
        Path::new(value.as_str().unwrap_or(""))
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string()
    });

    env.add_filter("dirname", |value: JinjaValue| {
        Path::new(value.as_str().unwrap_or(""))
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("")
            .to_string()
    });

    // Shell-quote a value for use inside a command
    env.add_filter("quote", |value: JinjaValue| {
        let text = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        shlex::try_quote(&text)
            .map(|quoted| quoted.into_owned())
            .unwrap_or_else(|_| "''".to_string())
    });

    env.add_function(
        "lookup",
        |type_str: String, key: Option<String>| -> JinjaValue {
            match (type_str.as_str(), key) {
                ("env", Some(key)) => JinjaValue::from(std::env::var(key).unwrap_or_default()),
                _ => JinjaValue::from(String::new()),
            }
        },
    );
}

/// Render a template string against a context
pub fn render_with_context(
    template: &str,
    context: &JinjaValue,
) -> Result<String, minijinja::Error> {
    let env = template_environment();
    env.render_str(template, context)
}
