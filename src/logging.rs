use anyhow::{Result, anyhow};
use chrono::Utc;
use log::LevelFilter;

fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Routes `log` records to stdout. Records from `app_name` and `module` use the
/// requested verbosity; everything else (the AWS SDK, hyper, the Lambda
/// runtime) is capped at `Warn`. Fails if a logger is already installed.
pub fn set_up_logger(app_name: &str, module: &str, verbose: bool) -> Result<()> {
    let level = level_for(verbose);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for(app_name.to_string(), level)
        .level_for(module.to_string(), level)
        .chain(std::io::stdout())
        .apply()
        .map_err(|err| anyhow!("Failed to set up logger: {err}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        assert_eq!(LevelFilter::Debug, level_for(true));
        assert_eq!(LevelFilter::Info, level_for(false));
    }

    #[test]
    fn test_set_up_logger_only_once() {
        assert!(set_up_logger("snapshot_gc", module_path!(), false).is_ok());

        let err = set_up_logger("snapshot_gc", module_path!(), true).unwrap_err();
        assert!(err.to_string().contains("Failed to set up logger"));
    }
}
