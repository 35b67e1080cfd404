// dbrestore/src/utils/prompt.rs
use std::io::{BufRead, Write, stdin, stdout};

use crate::errors::{RestoreError, Result};

/// Interactive input used by the orchestrator. Menus are numbered and 1-based on screen.
pub trait Prompt {
    /// Returns the zero-based index of the chosen item.
    fn select(&mut self, title: &str, items: &[String]) -> Result<usize>;
    fn input(&mut self, message: &str, default: Option<&str>) -> Result<String>;
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool>;
}

/// Line-based prompts on stdin/stdout.
pub struct TerminalPrompt {
    /// Answer yes to every confirmation (`--yes`).
    assume_yes: bool,
}

impl TerminalPrompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    fn read_line(&self) -> Result<String> {
        stdout().flush()?;
        let mut input = String::new();
        let read = stdin().lock().read_line(&mut input)?;
        if read == 0 {
            return Err(RestoreError::Cancelled("standard input closed".to_string()));
        }
        Ok(input.trim().to_string())
    }
}

impl Prompt for TerminalPrompt {
    fn select(&mut self, title: &str, items: &[String]) -> Result<usize> {
        if items.is_empty() {
            return Err(RestoreError::InvalidInput(format!("Nothing to choose for '{}'", title)));
        }
        println!("\n{}", title);
        for (i, item) in items.iter().enumerate() {
            println!("{:>3}. {}", i + 1, item);
        }
        loop {
            print!("Enter your choice (1-{}): ", items.len());
            let answer = self.read_line()?;
            match parse_choice(&answer, items.len()) {
                Some(index) => return Ok(index),
                None => println!("❌ Invalid choice '{}'. Please try again.", answer),
            }
        }
    }

    fn input(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        loop {
            match default {
                Some(d) => print!("{} [{}]: ", message, d),
                None => print!("{}: ", message),
            }
            let answer = self.read_line()?;
            if !answer.is_empty() {
                return Ok(answer);
            }
            if let Some(d) = default {
                return Ok(d.to_string());
            }
            println!("A value is required.");
        }
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        if self.assume_yes {
            println!("{} [auto-confirmed]", message);
            return Ok(true);
        }
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            print!("{} [{}]: ", message, hint);
            let answer = self.read_line()?;
            match parse_yes_no(&answer, default) {
                Some(v) => return Ok(v),
                None => println!("Please answer 'y' or 'n'."),
            }
        }
    }
}

fn parse_choice(answer: &str, len: usize) -> Option<usize> {
    answer
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=len).contains(n))
        .map(|n| n - 1)
}

fn parse_yes_no(answer: &str, default: bool) -> Option<bool> {
    match answer.to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
