//! `presenza presence`: one-shot occupancy query.

use std::fmt::Write;

use chrono::Utc;
use tabled::Tabled;

use presenza_config::{FileSettings, StateFile, state_path, to_monitor_config};
use presenza_core::{ChannelReading, PresenceMonitor, PresenceSnapshot};

use crate::cli::GlobalOpts;
use crate::commands::{load, report_warnings};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ReadingRow {
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Count")]
    count: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Fault")]
    fault: String,
}

fn row(reading: &ChannelReading, color: bool) -> ReadingRow {
    let age = (Utc::now() - reading.acquired_at)
        .to_std()
        .map(|d| humantime::format_duration(std::time::Duration::from_secs(d.as_secs())))
        .map_or_else(|_| "-".into(), |d| d.to_string());
    ReadingRow {
        channel: reading.channel.to_string(),
        count: reading.count.map_or_else(|| "-".into(), |c| c.to_string()),
        status: output::status_label(reading.status, color),
        age,
        fault: reading
            .fault
            .as_ref()
            .map_or_else(String::new, |f| format!("{}: {}", f.kind, f.message)),
    }
}

pub fn detail(snapshot: &PresenceSnapshot, color: bool) -> String {
    let mut out = String::new();
    let _ = write!(out, "Presenti: {}", snapshot.effective_total);
    if let Some(ref o) = snapshot.active_override {
        let _ = write!(
            out,
            " (override {} by {}, live {})",
            o.value, o.set_by, snapshot.live_total
        );
    }
    let rows: Vec<ReadingRow> = snapshot.channels.values().map(|r| row(r, color)).collect();
    if !rows.is_empty() {
        let _ = write!(out, "\n{}", output::render_table(&rows));
    }
    out
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = load(global)?;
    let monitor_config = to_monitor_config(&cfg)?;
    let store = StateFile::new(state_path(&cfg));
    let settings = FileSettings::new(cfg);

    let (snapshot, warnings) =
        PresenceMonitor::poll_once(&settings, &monitor_config, Some(&store)).await?;
    report_warnings(&warnings, global.quiet);

    let color = output::should_color(global.color);
    let rendered = output::render_single(
        global.output,
        &snapshot,
        |s| detail(s, color),
        |s| s.effective_total.to_string(),
    )
    .map_err(|e| CliError::Internal(e.to_string()))?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use presenza_core::{ChannelId, FaultKind, ReadingFault};

    use super::*;

    #[test]
    fn detail_lists_channels_and_faults() {
        let mut snapshot = PresenceSnapshot::empty();
        snapshot.effective_total = 3;
        snapshot.live_total = 3;
        let ok = ChannelReading::ok(ChannelId::from("d4"), 3, 1);
        let err = ChannelReading::error(
            ChannelId::from("d6"),
            ReadingFault {
                kind: FaultKind::Auth,
                message: "rejected".into(),
            },
            1,
        );
        snapshot.channels.insert(ok.channel.clone(), ok);
        snapshot.channels.insert(err.channel.clone(), err);

        let text = detail(&snapshot, false);
        assert!(text.starts_with("Presenti: 3"));
        assert!(text.contains("d4"));
        assert!(text.contains("auth: rejected"));
        assert!(!text.contains("override"));
    }
}
