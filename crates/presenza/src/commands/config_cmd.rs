//! Config subcommand handlers.

use presenza_config::{Config, save_config, store_channel_secret};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::commands::{config_file, load};
use crate::error::CliError;
use crate::output;

const MASK: &str = "****";

/// Copy of `cfg` with plaintext secrets masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for ch in &mut cfg.channels {
        if ch.password.is_some() {
            ch.password = Some(MASK.into());
        }
    }
    if cfg.server.admin_token.is_some() {
        cfg.server.admin_token = Some(MASK.into());
    }
    cfg
}

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let path = config_file(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&Config::sample(), &path)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
                eprintln!("Edit the [[channels]] entries, set enabled = true, then run: presenza serve");
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redacted(&load(global)?);
            let rendered = match global.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::Internal(e.to_string()))?,
                format => output::render_single(format, &cfg, |_| String::new(), |_| String::new())
                    .map_err(|e| CliError::Internal(e.to_string()))?,
            };
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config_file(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword { channel } => {
            let cfg = load(global)?;
            if cfg.channel(&channel).is_none() {
                return Err(CliError::ChannelNotFound {
                    available: cfg
                        .channels
                        .iter()
                        .map(|c| c.id.clone())
                        .collect::<Vec<_>>()
                        .join(", "),
                    channel,
                });
            }
            let password =
                rpassword::prompt_password(format!("Password for {channel}: ")).map_err(prompt_err)?;
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "cannot be empty".into(),
                });
            }
            store_channel_secret(&channel, &password)?;
            if !global.quiet {
                eprintln!("Stored in the system keyring. Restart `presenza serve` to apply.");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_plaintext_secrets() {
        let mut cfg = Config::sample();
        cfg.channels[0].password = Some("hunter2".into());
        cfg.server.admin_token = Some("t0ken".into());

        let text = toml::to_string_pretty(&redacted(&cfg)).unwrap_or_default();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("t0ken"));
        assert!(text.contains(MASK));
        assert_eq!(redacted(&cfg).channels[1].password, None);
    }
}
