use colored::{ColoredString, Colorize};
use worldview_core::Status;

pub fn print_header(text: &str) {
    println!("{}", format!("=== {} ===", text).bold().cyan());
}

pub fn print_success(text: &str) {
    println!("{} {}", "✓".green().bold(), text.green());
}

pub fn print_error(text: &str) {
    println!("{} {}", "✗".red().bold(), text.red());
}

pub fn print_warning(text: &str) {
    println!("{} {}", "⚠".yellow().bold(), text.yellow());
}

pub fn status(status: Status) -> ColoredString {
    let s = status.as_str().to_uppercase();
    match status {
        Status::Critical => s.red().bold(),
        Status::Warning => s.yellow().bold(),
        Status::Info => s.blue(),
        Status::Ok => s.green(),
        Status::Unknown => s.dimmed(),
    }
}
