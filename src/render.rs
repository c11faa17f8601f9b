//! Terminal rendering for calmerge-core types.

use calmerge_core::pipeline::CycleReport;
use calmerge_core::Source;
use owo_colors::OwoColorize;

/// Extension trait for colored terminal rendering.
pub trait Render {
    fn render(&self) -> String;
}

impl Render for Source {
    fn render(&self) -> String {
        let marker = if self.active {
            "●".green().to_string()
        } else {
            "○".dimmed().to_string()
        };

        let mut lines = vec![format!("{marker} {} {}", self.id.bold(), self.name)];
        lines.push(format!("   {}", self.url.dimmed()));

        if !self.categories.is_empty() {
            let categories: Vec<_> = self.categories.iter().map(String::as_str).collect();
            lines.push(format!("   categories: {}", categories.join(", ")));
        }
        let suppressed = self.suppress_guid.len() + self.suppress_urls.len();
        if suppressed > 0 {
            lines.push(format!("   {suppressed} suppression rules"));
        }

        lines.join("\n")
    }
}

impl Render for CycleReport {
    fn render(&self) -> String {
        let mut lines = Vec::new();

        if let Some(date) = self.cycle_date {
            lines.push(format!("Cycle {}", date.to_string().bold()));
        }
        lines.push(format!(
            "  {} sources, {} instances fetched, {} entries skipped",
            self.sources, self.fetched, self.skipped_entries
        ));
        lines.push(format!(
            "  {} suppressed, {} duplicates, {} overridden, {} direct",
            self.suppressed, self.duplicates, self.overridden, self.direct
        ));

        let c = &self.continuity;
        lines.push(format!(
            "  {} added, {} confirmed, {} retained, {} dropped",
            c.added.to_string().green(),
            c.confirmed,
            c.retained.to_string().yellow(),
            c.dropped.to_string().red()
        ));

        let a = &self.addresses;
        lines.push(format!(
            "  addresses: {} cached, {} looked up, {} fallback",
            a.cached, a.primary, a.fallback
        ));

        for (source, reason) in &self.failed_sources {
            lines.push(format!("  {} {source}: {reason}", "failed".red()));
        }

        lines.push(format!("  {} events total", self.total.to_string().bold()));
        lines.join("\n")
    }
}
