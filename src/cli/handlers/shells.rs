use crate::core::registry::Registry;
use crate::core::which::{self, ResolveOptions};
use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

/// Lists registered shells with the executable each resolves to.
pub fn handle(_args: Vec<String>, registry: &Arc<Registry>) -> Result<i32> {
    let default = registry.default_shell();
    for id in registry.shells().list() {
        let marker = if id == default { "*" } else { " " };
        let resolved = match which::resolve_sync(registry, &id, &ResolveOptions::default()) {
            Some(path) => path.display().to_string().green(),
            None => "not found".dimmed(),
        };
        println!("{} {:<14} {}", marker, id.cyan().bold(), resolved);
    }
    Ok(0)
}
