//! `tracing` integration: route events of the embedding program into a session

use crate::caller::CallSite;
use crate::level::Level;
use crate::session::LogSession;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Field carried by the diagnostics this crate emits about itself
const INTERNAL_EVENT_FIELD: &str = "teelog.event";

/// Layer that writes every `tracing` event as a session record.
///
/// The location tag comes from the event's own file and line. Events emitted
/// by this crate are skipped so a failing sink cannot feed itself.
pub struct TeeLayer {
    session: Arc<LogSession>,
    echo: bool,
}

impl TeeLayer {
    pub fn new(session: Arc<LogSession>) -> Self {
        Self {
            session,
            echo: false,
        }
    }

    /// Also echo events to the terminal, like the `tee_*` methods
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn session(&self) -> &Arc<LogSession> {
        &self.session
    }
}

impl<S> Layer<S> for TeeLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.fields().field(INTERNAL_EVENT_FIELD).is_some() {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.finish();

        let level = Level::from(*metadata.level());
        if self.echo {
            self.session.echo(&message, level.tone());
        }

        let site = CallSite {
            file: metadata
                .file()
                .and_then(|file| Path::new(file).file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| metadata.target().to_string()),
            line: metadata.line().unwrap_or(0),
        };
        self.session.emit_resolved(level, &message, &site);
    }
}

/// Collects the `message` field followed by `key=value` pairs
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use std::io::Read;
    use tempfile::TempDir;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_events_become_records() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = SessionConfig::new("layered");
        config.log_dir = temp_dir.path().to_path_buf();
        config.suppress_printout = Some(true);
        let session = Arc::new(LogSession::new(config).unwrap());

        let subscriber = tracing_subscriber::registry().with(TeeLayer::new(Arc::clone(&session)));
        let line = tracing::subscriber::with_default(subscriber, || {
            let line = line!() + 1;
            tracing::warn!(attempt = 3, user = "ada", "disk almost full");
            line
        });

        let mut text = String::new();
        std::fs::File::open(session.log_file_path().unwrap())
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        let record = text.lines().last().unwrap();
        assert!(record.contains("[WARNING ]"), "{}", record);
        assert!(record.contains(&format!("[layer:{}", line)), "{}", record);
        assert!(record.ends_with("disk almost full attempt=3 user=\"ada\""), "{}", record);
    }

    #[test]
    fn test_visitor_without_message() {
        let mut visitor = MessageVisitor::default();
        visitor.push_field("a", format_args!("{}", 1));
        visitor.push_field("b", format_args!("{}", 2));
        assert_eq!(visitor.finish(), "a=1 b=2");
    }
}
