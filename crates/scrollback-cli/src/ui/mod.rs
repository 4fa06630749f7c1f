use console::style;
use dialoguer::{theme::ColorfulTheme, FuzzySelect, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", style("✔").green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    println!("{} {}", style("✖").red(), msg);
}

/// Print warning message
pub fn warn(msg: &str) {
    println!("{} {}", style("!").yellow(), msg);
}

/// Print info message (indented)
pub fn info(msg: &str) {
    println!("  {}", msg);
}

/// Print a header/title
pub fn header(msg: &str) {
    println!();
    println!("  {}", style(msg).bold());
    println!();
}

/// Print an indexed listing row: `  12  name (id)`
pub fn row(index: usize, name: &str, id: &str) {
    println!("  {:>3}  {} {}", index, name, style(format!("({})", id)).dim());
}

/// Prompt for a password/token (masked input)
pub fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    let value = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .interact()?;
    Ok(value)
}

/// Prompt for regular text input
pub fn prompt_input(prompt: &str) -> anyhow::Result<String> {
    let value = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .interact_text()?;
    Ok(value)
}

/// Prompt for text input with a pre-filled default
pub fn prompt_input_default(prompt: &str, default: &str) -> anyhow::Result<String> {
    let value = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default.to_string())
        .interact_text()?;
    Ok(value)
}

/// Prompt for a selection from a list (type to filter)
pub fn prompt_select(prompt: &str, items: &[String]) -> anyhow::Result<usize> {
    let selection = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact()?;
    Ok(selection)
}

/// Prompt for one of a few fixed choices
pub fn prompt_choice(prompt: &str, items: &[&str]) -> anyhow::Result<usize> {
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact()?;
    Ok(selection)
}

/// Create a spinner for indeterminate progress
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
