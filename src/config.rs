// Application configuration, loaded from environment variables and CLI flags.

use rand::RngCore;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind the server to.
    pub host: String,
    /// Port to bind the server to.
    pub port: u16,
    /// Secret for session token HMACs. Random per boot when unset, which
    /// invalidates sessions across restarts (the world is regenerated
    /// anyway).
    pub session_secret: Vec<u8>,
    /// Key gating the security dashboard. Dashboard disabled when unset.
    pub admin_key: Option<String>,
    /// Detonation scheduler frequency in Hz.
    pub tick_rate: u32,
    /// World generation seed. Random per boot when unset.
    pub world_seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `HOST` - bind address (default: `0.0.0.0`)
    /// - `PORT` - bind port (default: 8080)
    /// - `SESSION_SECRET` - HMAC secret (default: 32 random bytes)
    /// - `ADMIN_KEY` - security dashboard key (default: disabled)
    /// - `TICK_RATE` - scheduler frequency in Hz (default: 60)
    /// - `WORLD_SEED` - world generation seed (default: random)
    ///
    /// CLI flags:
    /// - `--port <PORT>` - override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(8080);

        let session_secret = match std::env::var("SESSION_SECRET") {
            Ok(s) if !s.is_empty() => s.into_bytes(),
            _ => {
                let mut secret = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                tracing::info!("SESSION_SECRET not set; using a random per-boot secret");
                secret
            }
        };

        let admin_key = std::env::var("ADMIN_KEY").ok().filter(|k| !k.is_empty());

        let tick_rate = std::env::var("TICK_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let world_seed = std::env::var("WORLD_SEED")
            .ok()
            .and_then(|v| v.parse().ok());

        Config {
            host,
            port,
            session_secret,
            admin_key,
            tick_rate,
            world_seed,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_value() {
        let args = vec![
            "minefield-backend".to_string(),
            "--port".to_string(),
            "9000".to_string(),
        ];
        assert_eq!(
            Config::parse_cli_value(&args, "--port"),
            Some("9000".to_string())
        );
        assert_eq!(Config::parse_cli_value(&args, "--host"), None);
    }
}
