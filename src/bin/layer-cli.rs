use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "layer-cli")]
#[command(about = "Management CLI for the integration layer admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081", env = "LAYER_ADMIN_URL")]
    url: String,

    #[arg(short, long, env = "LAYER_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall layer status
    Status,
    /// Circuit state and error rate per integration
    Integrations,
    /// Fails when any circuit is open
    Health,
    /// Two-tier cache statistics
    CacheStats,
    /// Invalidate cached entries by glob pattern
    Invalidate {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Integrations => client.get(format!("{base}/admin/integrations")),
        Commands::Health => client.get(format!("{base}/admin/integrations/health")),
        Commands::CacheStats => client.get(format!("{base}/admin/cache/stats")),
        Commands::Invalidate { patterns } => client
            .post(format!("{base}/admin/cache/invalidate"))
            .json(&json!({ "patterns": patterns })),
    };

    let res = request.headers(headers).send().await?;
    let healthy = print_response(res).await?;
    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the body; returns false for non-success statuses.
async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => eprintln!("Response: {}", text),
        Err(_) => {}
    }
    Ok(status.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_key_and_url_from_env() {
        std::env::set_var("LAYER_ADMIN_KEY", "from-env");
        std::env::set_var("LAYER_ADMIN_URL", "http://admin.internal:9000");
        let cli = Cli::try_parse_from(["layer-cli", "status"]).unwrap();
        std::env::remove_var("LAYER_ADMIN_KEY");
        std::env::remove_var("LAYER_ADMIN_URL");

        assert_eq!(cli.key, "from-env");
        assert_eq!(cli.url, "http://admin.internal:9000");
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_flags_parse_without_env() {
        let cli = Cli::try_parse_from([
            "layer-cli",
            "--key",
            "k",
            "--url",
            "http://127.0.0.1:1",
            "invalidate",
            "permit:*",
        ])
        .unwrap();
        assert_eq!(cli.key, "k");
        match cli.command {
            Commands::Invalidate { patterns } => assert_eq!(patterns, vec!["permit:*"]),
            _ => panic!("expected invalidate"),
        }
    }
}
