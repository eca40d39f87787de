use crate::core::conversation::{Message, Role};
use colored::*;

/// Section title, underlined to its width in characters.
pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", underline(text).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{} {}", "ok:".green().bold(), text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{} {}", "error:".red().bold(), text.red());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue().italic());
}

pub fn print_message(message: &Message) {
    let label = format!("[{}] {}:", message.position, message.role);
    let label = match message.role {
        Role::User => label.yellow().bold(),
        Role::Assistant => label.green().bold(),
        Role::System => label.magenta().bold(),
    };
    println!(
        "{} {}",
        label,
        message.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
    );
    println!("{}\n", message.content);
}

fn underline(text: &str) -> String {
    "=".repeat(text.chars().count())
}
