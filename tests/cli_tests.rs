use anyhow::Result;
use clap::Parser;
use domintel::cli::{Cli, Commands};
use domintel::config::Settings;
use std::path::PathBuf;

#[test]
fn test_cli_analyze_command() -> Result<()> {
    let cli = Cli::try_parse_from(["domintel", "analyze", "--domain", "example.cl"])?;

    match &cli.command {
        Commands::Analyze { domain } => assert_eq!(domain, "example.cl"),
        _ => panic!("Expected Analyze command"),
    }

    // global flags are optional and unset by default
    assert_eq!(cli.timeout_ms, None);
    assert_eq!(cli.concurrent_requests, None);
    assert_eq!(cli.config, None);

    Ok(())
}

#[test]
fn test_cli_batch_command() -> Result<()> {
    let cli = Cli::try_parse_from([
        "domintel",
        "batch",
        "--input-file",
        "input.txt",
        "--output-file",
        "output.jsonl",
        "--chunk-size",
        "500",
        "--rate-limit",
        "30",
    ])?;

    match cli.command {
        Commands::Batch {
            input_file,
            output_file,
            chunk_size,
            rate_limit,
        } => {
            assert_eq!(input_file, PathBuf::from("input.txt"));
            assert_eq!(output_file, Some(PathBuf::from("output.jsonl")));
            assert_eq!(chunk_size, 500);
            assert_eq!(rate_limit, 30);
        }
        _ => panic!("Expected Batch command"),
    }

    Ok(())
}

#[test]
fn test_cli_batch_defaults() -> Result<()> {
    let cli = Cli::try_parse_from(["domintel", "batch", "-i", "domains.txt"])?;

    match cli.command {
        Commands::Batch {
            output_file,
            chunk_size,
            rate_limit,
            ..
        } => {
            assert_eq!(output_file, None);
            assert_eq!(chunk_size, 100);
            assert_eq!(rate_limit, 20);
        }
        _ => panic!("Expected Batch command"),
    }

    Ok(())
}

#[test]
fn test_cli_cached_requires_domain() {
    assert!(Cli::try_parse_from(["domintel", "cached"]).is_err());
    assert!(Cli::try_parse_from(["domintel", "cached", "-d", "example.cl"]).is_ok());
}

#[test]
fn test_flags_override_settings() -> Result<()> {
    let cli = Cli::try_parse_from([
        "domintel",
        "--timeout-ms",
        "3000",
        "--concurrent-requests",
        "2",
        "--store-dir",
        "/var/lib/domintel",
        "analyze",
        "-d",
        "example.cl",
    ])?;

    let mut settings = Settings::default();
    cli.apply(&mut settings);

    assert_eq!(settings.fetch_timeout_ms, 3000);
    assert_eq!(settings.concurrent_requests, 2);
    assert_eq!(settings.store_dir, PathBuf::from("/var/lib/domintel"));
    // untouched keys keep their defaults
    assert_eq!(settings.dns_timeout_ms, Settings::default().dns_timeout_ms);

    Ok(())
}

#[test]
fn test_settings_file_overlays_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("domintel.json");
    std::fs::write(&path, r#"{"staleness_hours": 12, "home_country": "AR"}"#)?;

    let settings = Settings::load(Some(&path))?;
    assert_eq!(settings.staleness_hours, 12);
    assert_eq!(settings.home_country, "AR");
    assert_eq!(settings.registration_attempts, 3);
    assert_eq!(settings.staleness(), chrono::Duration::hours(12));

    std::fs::write(&path, r#"{"registration_relays": ["https://rdap.org/domain/"]}"#)?;
    assert!(Settings::load(Some(&path)).is_err());

    Ok(())
}
