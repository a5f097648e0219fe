use crate::{cli::OutputFormat, error::Result};
use chrono::{DateTime, Utc};
#[cfg(feature = "colored-output")]
use colored::*;
use notification_sync::{ConnectionState, NotificationRecord, NotificationView};
use serde::Serialize;

/// Longest message excerpt shown in pretty output.
const MESSAGE_WIDTH: usize = 72;

#[derive(Clone, Copy)]
enum Color {
    Green,
    Yellow,
    Red,
    Cyan,
    Dimmed,
}

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_view(
        &self,
        view: &NotificationView,
        format: OutputFormat,
        now: DateTime<Utc>,
    ) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(self.format_view_pretty(view, now)),
            OutputFormat::Json => format_json(view, true),
            OutputFormat::JsonCompact => format_json(view, false),
        }
    }

    pub fn format_records(
        &self,
        records: &[NotificationRecord],
        format: OutputFormat,
        now: DateTime<Utc>,
    ) -> Result<String> {
        match format {
            OutputFormat::Pretty => {
                let mut output = String::new();
                self.push_records(&mut output, records, now);
                Ok(output)
            }
            OutputFormat::Json => format_json(&records, true),
            OutputFormat::JsonCompact => format_json(&records, false),
        }
    }

    pub fn success(&self, message: &str) -> String {
        format!("{} {}", self.colorize("✓", Color::Green, true), message)
    }

    fn format_view_pretty(&self, view: &NotificationView, now: DateTime<Utc>) -> String {
        let mut output = String::new();

        let scope = view
            .scope
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!(
            "{} {}  [{}]  {}\n",
            self.colorize("Notifications for", Color::Green, true),
            self.colorize(&scope, Color::Cyan, false),
            self.connection_label(view.connection),
            self.colorize(&format!("{} unread", view.unread_count), Color::Yellow, true),
        ));

        if view.is_loading {
            output.push_str(&self.colorize("  refreshing...\n", Color::Dimmed, false));
        }
        if let Some(error) = &view.error {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("!", Color::Red, true),
                self.colorize(&error.to_string(), Color::Red, false)
            ));
        }

        self.push_records(&mut output, &view.notifications, now);
        output
    }

    fn push_records(&self, output: &mut String, records: &[NotificationRecord], now: DateTime<Utc>) {
        if records.is_empty() {
            output.push_str(&self.colorize("  No notifications\n", Color::Dimmed, false));
            return;
        }

        for record in records {
            let marker = if record.is_read {
                self.colorize("○", Color::Dimmed, false)
            } else {
                self.colorize("●", Color::Yellow, true)
            };
            let title = if record.title.is_empty() {
                record.kind.as_str()
            } else {
                record.title.as_str()
            };
            output.push_str(&format!(
                "  {} {}  {}  {}\n",
                marker,
                self.colorize(title, Color::Cyan, !record.is_read),
                self.colorize(&record.relative_age(now), Color::Dimmed, false),
                self.colorize(&format!("#{}", record.id), Color::Dimmed, false),
            ));
            if !record.message.is_empty() {
                output.push_str(&format!("      {}\n", excerpt(&record.message, MESSAGE_WIDTH)));
            }
            if let Some(link) = &record.link {
                output.push_str(&format!("      {}\n", self.colorize(link, Color::Dimmed, false)));
            }
        }
    }

    fn connection_label(&self, state: ConnectionState) -> String {
        let color = match state {
            ConnectionState::Connected => Color::Green,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => Color::Yellow,
            ConnectionState::Disconnected => Color::Red,
        };
        self.colorize(&state.to_string(), color, false)
    }

    fn colorize(&self, text: &str, color: Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Red => text.red(),
                    Color::Cyan => text.cyan(),
                    Color::Dimmed => text.dimmed(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

fn format_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

/// First line of `text`, cut at `width` characters.
fn excerpt(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= width {
        return line.to_string();
    }
    let cut: String = line.chars().take(width.saturating_sub(1)).collect();
    format!("{cut}…")
}
