//! Priming message template rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

/// Render the priming template with the user's goal text.
///
/// The template is user-configured (`[redirect].template`) and uses
/// `{{ goal }}` for substitution.
pub fn render(template: &str, goal: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("priming", template)
        .context("parse priming template")?;
    let rendered = env
        .get_template("priming")?
        .render(context! { goal => goal })
        .context("render priming template")?;
    Ok(rendered)
}
