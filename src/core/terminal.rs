use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

enum GuideLine {
    Status(String, String),
    Text(String),
    Info(String),
    Command(String, String),
    Blank,
}

/// A titled block of CLI output, built line by line and printed at once.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Info(text.to_string()));
        self
    }

    pub fn command(mut self, cmd: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(cmd.to_string(), description.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(&self) {
        println!("\n  {}", style(&self.title).bold().underlined());
        let pad = self
            .lines
            .iter()
            .filter_map(|l| match l {
                GuideLine::Command(cmd, _) => Some(cmd.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        for line in &self.lines {
            match line {
                GuideLine::Status(label, value) => {
                    println!("  {}: {}", style(label).bold().cyan(), value)
                }
                GuideLine::Text(text) => {
                    for l in text.lines() {
                        println!("  {}", l);
                    }
                }
                GuideLine::Info(text) => println!("  {}{}", INFO_ICON, text),
                GuideLine::Command(cmd, description) => println!(
                    "    {:<pad$}  {}",
                    style(cmd).green(),
                    style(description).dim(),
                    pad = pad
                ),
                GuideLine::Blank => println!(),
            }
        }
    }
}

pub fn print_banner(role: &str) {
    println!();
    // Gradient: #818cf8 → #22d3ee across the title
    let title = "ingest-control";
    let from: (u8, u8, u8) = (129, 140, 248);
    let to: (u8, u8, u8) = (34, 211, 238);
    let last = (title.len().max(2) - 1) as u32;
    for (i, ch) in title.chars().enumerate() {
        let (r, g, b) = lerp_color(from, to, i as u32 * 1000 / last);
        print!("\x1b[1;38;2;{};{};{}m{}", r, g, b, ch);
    }
    println!("\x1b[0m {}", style(role).dim());
    println!();
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Stopped.").bold().cyan());
}
