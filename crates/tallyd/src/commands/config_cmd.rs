//! Config subcommand handlers.

use tally_config::Settings;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const MASK: &str = "****";

/// Copy of `settings` with every stored password masked.
fn redacted(settings: &Settings) -> Settings {
    let mut shown = settings.clone();
    for password in [&mut shown.wifi.password, &mut shown.access_point.password] {
        if !password.is_empty() {
            MASK.clone_into(password);
        }
    }
    shown
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global.config_path();
    match args.command {
        ConfigCommand::Show => {
            let settings =
                tally_config::load_from(&path).map_err(|e| CliError::config(e, &path))?;
            let shown = redacted(&settings);
            let out = match global.output {
                OutputFormat::Table => toml::to_string_pretty(&shown)?,
                OutputFormat::Json => output::render_json(&shown)?,
            };
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Reset => {
            tally_config::reset_at(&path).map_err(|e| CliError::config(e, &path))?;
            if !global.quiet {
                eprintln!("Settings reset to defaults ({} removed)", path.display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_masked_when_set() {
        let mut settings = Settings::default();
        settings.wifi.password = "studio-secret".into();
        let shown = redacted(&settings);
        assert_eq!(shown.wifi.password, MASK);
        assert_eq!(shown.access_point.password, MASK);
        assert_eq!(shown.tsl, settings.tsl);
    }

    #[test]
    fn empty_password_stays_empty() {
        let shown = redacted(&Settings::default());
        assert!(shown.wifi.password.is_empty());
    }
}
