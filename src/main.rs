use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use log::debug;
use snapshot_gc::{APP_NAME, gc_snapshots, gc_snapshots_in_region, set_up_logger};

#[derive(Debug)]
struct Args {
    verbose: bool,
    dry_run: bool,
    region: Option<String>,
}

fn command() -> Command {
    Command::new("snapshot-gc")
        .version("0.1")
        .author("Jacob Luszcz")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Verbose mode. Outputs DEBUG and higher log messages."),
        )
        .arg(
            Arg::new("dryrun")
                .short('d')
                .long("dryrun")
                .alias("dry-run")
                .action(ArgAction::SetTrue)
                .help("Keeps all snapshots, even if they would otherwise be deleted."),
        )
        .arg(
            Arg::new("region")
                .short('r')
                .long("region")
                .env("AWS_REGION")
                .help("AWS region to sweep EBS snapshots in."),
        )
}

fn parse_args() -> Args {
    let matches = command().get_matches();

    Args {
        verbose: matches.get_flag("verbose"),
        dry_run: matches.get_flag("dryrun"),
        region: matches.get_one::<String>("region").cloned(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    set_up_logger(APP_NAME, module_path!(), args.verbose)?;
    debug!("{:?}", args);

    let report = match args.region {
        Some(region) => gc_snapshots_in_region(region, args.dry_run).await?,
        None => gc_snapshots(args.dry_run).await?,
    };
    debug!("{:?}", report);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        command().debug_assert();
    }

    #[test]
    fn test_flags() {
        let matches =
            command().get_matches_from(["snapshot-gc", "-v", "--dry-run", "-r", "us-east-1"]);

        assert!(matches.get_flag("verbose"));
        assert!(matches.get_flag("dryrun"));
        assert_eq!(
            Some("us-east-1"),
            matches.get_one::<String>("region").map(String::as_str)
        );
    }
}
