//! Terminal output helpers

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Status lines on stderr, results on stdout.
#[derive(Debug, Clone)]
pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn success(&self, message: &str) {
        eprintln!("{} {}", "✓".green(), message);
    }

    pub fn info(&self, message: &str) {
        eprintln!("{} {}", "•".cyan(), message);
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", "!".yellow(), message);
    }

    /// Pretty JSON on stdout.
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

pub fn print_section(title: &str) {
    println!("\n{}", title.bold().cyan());
    println!("{}", "=".repeat(title.len().max(40)));
}

pub fn print_field(name: &str, value: &str) {
    println!("  {:<18} {}", format!("{}:", name).bold(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json", true).unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("TABLE", true).unwrap(), OutputFormat::Table);
        assert!(OutputFormat::from_str("yaml", true).is_err());
    }
}
