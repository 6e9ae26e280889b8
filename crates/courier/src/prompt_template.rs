use serde::Serialize;
use std::fs;
use std::path::Path;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::Tool;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

#[derive(Serialize)]
struct SystemContext<'a> {
    tools: &'a [Tool],
    current_date: String,
}

pub fn render<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    tera.render("inline_template", &context)
}

pub fn render_file<T: Serialize>(path: &Path, context_data: &T) -> Result<String, TeraError> {
    let template = fs::read_to_string(path)
        .map_err(|e| TeraError::chain(format!("read template {}", path.display()), e))?;
    render(&template, context_data)
}

/// Where the system prompt template comes from
#[derive(Debug, Clone, Default)]
pub enum SystemTemplate {
    #[default]
    Builtin,
    File(std::path::PathBuf),
}

impl SystemTemplate {
    /// Render the system prompt for the tools currently on offer
    pub fn render(&self, tools: &[Tool]) -> Result<String, TeraError> {
        let context = SystemContext {
            tools,
            current_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
        };
        match self {
            SystemTemplate::Builtin => render(SYSTEM_TEMPLATE, &context),
            SystemTemplate::File(path) => render_file(path, &context),
        }
    }
}
