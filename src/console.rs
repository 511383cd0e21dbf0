//! Colored console output for scan results.

use crate::crawl::CrawlProgress;
use crate::types::{Detection, ExtractionResult, ScanReport};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Categories highlighted as findings in the summary.
const HIGHLIGHT_CATEGORIES: &[&str] = &[
    "credentials",
    "jwts",
    "awsKeys",
    "googleApiKeys",
    "githubTokens",
    "gitlabTokens",
    "bearerTokens",
    "basicAuth",
    "webhookUrls",
    "idCards",
];

/// Console output handler with colors and formatting.
pub struct ConsoleOutput {
    verbose: bool,
    json_mode: bool,
    quiet: bool,
}

impl ConsoleOutput {
    pub fn new(verbose: bool, json_mode: bool, quiet: bool) -> Self {
        Self {
            verbose,
            json_mode,
            quiet,
        }
    }

    /// Print scan start message.
    pub fn print_scan_start(&self, target: &str) {
        if self.json_mode || self.quiet {
            return;
        }
        println!("{} Scanning: {}", "[*]".bright_blue(), target.bright_white());
    }

    /// Print scan progress (only in verbose mode).
    pub fn print_progress(&self, message: &str) {
        if self.json_mode || !self.verbose {
            return;
        }
        println!("{} {}", "[.]".dimmed(), message.dimmed());
    }

    /// Print info message.
    pub fn print_info(&self, message: &str) {
        if self.json_mode || self.quiet {
            return;
        }
        println!("{} {}", "[*]".bright_blue(), message);
    }

    /// Throttled deep-crawl display update.
    pub fn print_crawl_progress(&self, progress: &CrawlProgress) {
        if self.json_mode || self.quiet {
            return;
        }
        println!(
            "{} depth {}/{} | processed {} | queued {} | findings {}",
            "[~]".cyan(),
            progress.depth,
            progress.max_depth,
            progress.processed,
            progress.queued,
            progress.detections
        );
    }

    /// Print one highlighted finding.
    pub fn print_finding(&self, category: &str, detection: &Detection) {
        if self.json_mode {
            return;
        }

        let confidence = format_confidence(detection.confidence);
        let verified = if detection.double_verified {
            " [double-verified]".green().bold().to_string()
        } else {
            String::new()
        };

        println!();
        println!(
            "{} {} [{}]{}",
            "===".bright_cyan(),
            truncate_value(&detection.value).bright_white().bold(),
            category.yellow(),
            verified
        );
        println!("    |-- Source: {}", detection.source_url.dimmed());
        println!("    |-- Engine: {:?}", detection.source);
        if let Some(location) = &detection.location {
            println!(
                "    |-- Location: line {}, col {}",
                location.start.line, location.start.column
            );
        }
        println!("    +-- Confidence: {}", confidence);
    }

    /// Print the scan summary table.
    pub fn print_summary(&self, report: &ScanReport) {
        if self.json_mode {
            if let Ok(json) = serde_json::to_string_pretty(report) {
                println!("{}", json);
            }
            return;
        }

        let highlight_count = count_highlights(&report.results);
        if self.quiet && highlight_count == 0 {
            return;
        }

        println!();
        println!("{}", "=== Scan Summary ===".bright_cyan());
        println!("  Target:    {}", report.target);
        if let Some(title) = &report.page_title {
            println!("  Title:     {}", title);
        }
        println!("  Duration:  {:.2}s", report.duration_secs);
        println!("  Pages:     {}", report.pages_scanned + 1);
        println!("  Findings:  {}", report.results.total());

        report.results.for_each(|category, detections| {
            if detections.is_empty() {
                return;
            }
            let line = format!("    {:<24} {}", category, detections.len());
            if HIGHLIGHT_CATEGORIES.contains(&category) {
                println!("{}", line.red().bold());
            } else {
                println!("{}", line);
            }
        });

        if highlight_count > 0 {
            println!(
                "  {}",
                format!("SENSITIVE ARTIFACTS FOUND: {}", highlight_count)
                    .red()
                    .bold()
            );
        } else {
            println!("  {}", "No high-sensitivity artifacts found.".green());
        }

        if !report.errors.is_empty() {
            println!();
            println!("{}", "Errors encountered:".yellow());
            for error in &report.errors {
                println!("  - {}", error.dimmed());
            }
        }

        println!();
    }

    /// Print every highlighted finding in the report.
    pub fn print_highlights(&self, report: &ScanReport) {
        if self.json_mode || self.quiet {
            return;
        }
        report.results.for_each(|category, detections| {
            if !HIGHLIGHT_CATEGORIES.contains(&category) {
                return;
            }
            for detection in detections {
                self.print_finding(category, detection);
            }
        });
    }

    /// Create a progress bar.
    pub fn create_progress_bar(&self, total: u64, message: &str) -> Option<ProgressBar> {
        if self.json_mode {
            return None;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(message.to_string());
        Some(pb)
    }
}

fn count_highlights(results: &ExtractionResult) -> usize {
    let mut count = 0;
    results.for_each(|category, detections| {
        if HIGHLIGHT_CATEGORIES.contains(&category) {
            count += detections.len();
        }
    });
    count
}

fn truncate_value(value: &str) -> String {
    if value.len() <= 80 {
        value.to_string()
    } else {
        format!("{}...", &value[..value.char_indices().take(77).last().map(|(i, c)| i + c.len_utf8()).unwrap_or(77)])
    }
}

fn format_confidence(confidence: f64) -> colored::ColoredString {
    if confidence >= 0.85 {
        format!("{:.2}", confidence).green()
    } else if confidence >= 0.65 {
        format!("{:.2}", confidence).yellow()
    } else {
        format!("{:.2}", confidence).dimmed()
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(false, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_output_creation() {
        let output = ConsoleOutput::new(true, false, false);
        assert!(output.verbose);
        assert!(!output.json_mode);
    }

    #[test]
    fn test_truncate_value() {
        assert_eq!(truncate_value("short"), "short");
        let long = "x".repeat(200);
        assert!(truncate_value(&long).len() < 90);
    }

    #[test]
    fn test_count_highlights() {
        use crate::types::{Detection, DetectionType};
        let mut results = ExtractionResult::default();
        results.insert(
            "credentials",
            Detection::regex(DetectionType::Credential, "tok_123456", "https://a/"),
        );
        results.insert(
            "domains",
            Detection::regex(DetectionType::Domain, "example.com", "https://a/"),
        );
        assert_eq!(count_highlights(&results), 1);
    }
}
