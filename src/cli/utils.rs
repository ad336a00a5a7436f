use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::registry::{HistoryEntry, Module, Version};

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(target), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(output_format: &OutputFormat, message: &str) {
    match output_format {
        OutputFormat::Json => {
            let response = json!({
                "success": false,
                "error": message
            });
            println!("{}", response);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
}

pub fn output_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_modules(modules: &[Module]) {
    if modules.is_empty() {
        println!("No modules registered");
        return;
    }

    println!(
        "{:<24} {:<8} {:<12} {:<12} {:>8}",
        "NAME", "ENV", "CURRENT", "DEPLOYED", "VERSIONS"
    );
    for module in modules {
        println!(
            "{:<24} {:<8} {:<12} {:<12} {:>8}",
            module.name,
            module.env,
            module.current_version.as_deref().unwrap_or("-"),
            module.deployed_version.as_deref().unwrap_or("-"),
            module.versions.len()
        );
    }
}

pub fn print_module(module: &Module) {
    println!("Module:      {}", module.name);
    println!("Environment: {}", module.env);
    if let Some(description) = &module.description {
        println!("Description: {}", description);
    }
    if !module.tags.is_empty() {
        println!("Tags:        {}", join_tags(module.tags.iter()));
    }
    println!("Current:     {}", module.current_version.as_deref().unwrap_or("none"));
    println!("Deployed:    {}", module.deployed_version.as_deref().unwrap_or("no"));
    println!("Updated:     {}", module.updated_at.to_rfc3339());
    println!();
    print_versions(&module.versions);
}

pub fn print_versions(versions: &[Version]) {
    println!("{:<16} {:<10} {:<26} {}", "VERSION", "STATUS", "CREATED", "DESCRIPTION");
    for version in versions {
        println!(
            "{:<16} {:<10} {:<26} {}",
            version.label,
            version.status,
            version.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            version.description.as_deref().unwrap_or("")
        );
    }
}

pub fn print_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No history recorded");
        return;
    }

    for entry in entries {
        let mut line = format!(
            "{}  {:<10} {:<12} {:<10} by {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            entry.version.as_deref().unwrap_or("-"),
            entry.outcome,
            entry.operator
        );
        if let Some(detail) = &entry.detail {
            line.push_str(&format!(" ({})", detail));
        }
        println!("{}", line);
    }
}

fn join_tags<'a>(tags: impl Iterator<Item = &'a String>) -> String {
    tags.map(String::as_str).collect::<Vec<_>>().join(", ")
}
