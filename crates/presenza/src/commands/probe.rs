//! `presenza probe <channel>`: talk to one device and show the answer.

use std::fmt::Write;

use serde::Serialize;

use presenza_config::{Config, to_channel_config, to_monitor_config};
use presenza_core::{CoreError, DeviceChannel};

use crate::cli::{GlobalOpts, ProbeArgs};
use crate::commands::load;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ProbeReport {
    channel: String,
    summary_url: String,
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_info: Option<SystemInfo>,
}

#[derive(Debug, Serialize)]
struct SystemInfo {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

fn detail(report: &ProbeReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Channel:   {}", report.channel);
    let _ = writeln!(out, "URL:       {}", report.summary_url);
    let _ = writeln!(out, "Digest:    {}", if report.authenticated { "yes" } else { "no" });
    match (&report.count, &report.error) {
        (Some(count), _) => {
            let _ = writeln!(out, "Count:     {count}");
        }
        (None, Some(err)) => {
            let _ = writeln!(out, "Error:     {err}");
        }
        (None, None) => {}
    }
    if let Some(ref info) = report.system_info {
        let _ = writeln!(out, "\nSystem info (HTTP {}):", info.status);
        for line in info.body.lines() {
            let _ = writeln!(out, "  {line}");
        }
    }
    out.trim_end().to_owned()
}

fn find_channel<'a>(
    cfg: &'a Config,
    id: &str,
) -> Result<&'a presenza_config::ChannelEntry, CliError> {
    cfg.channel(id).ok_or_else(|| CliError::ChannelNotFound {
        channel: id.to_owned(),
        available: if cfg.channels.is_empty() {
            "(none)".into()
        } else {
            cfg.channels
                .iter()
                .map(|c| c.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        },
    })
}

pub async fn handle(args: ProbeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = load(global)?;
    let polling = to_monitor_config(&cfg)?.polling;
    let entry = find_channel(&cfg, &args.channel)?;
    let channel = to_channel_config(entry, &cfg.defaults);
    channel.validate()?;

    let device = DeviceChannel::from_config(&channel, &polling)?;
    let client = device.client();

    let system_info = if args.count_only {
        None
    } else {
        let reply = client.system_info().await.map_err(CoreError::from)?;
        Some(SystemInfo {
            status: reply.status,
            headers: reply.headers,
            body: reply.body,
        })
    };
    let count = client.fetch_count().await.map_err(CoreError::from);

    let report = ProbeReport {
        channel: channel.display_name().to_owned(),
        summary_url: client
            .summary_url()
            .map_or_else(|e| e.to_string(), |u| u.to_string()),
        authenticated: client.is_authenticated(),
        count: count.as_ref().ok().copied(),
        error: count.as_ref().err().map(ToString::to_string),
        system_info,
    };

    let rendered = output::render_single(global.output, &report, detail, |r| {
        r.count.map_or_else(String::new, |c| c.to_string())
    })
    .map_err(|e| CliError::Internal(e.to_string()))?;
    output::print_output(&rendered, global.quiet);

    count.map(|_| ()).map_err(CliError::from)
}
