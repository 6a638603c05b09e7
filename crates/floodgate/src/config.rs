use crate::proxy::Cidr;
use crate::registry::{IDLE_EXPIRY, SWEEP_INTERVAL};
use crate::throttle::{ABUSE_LEAD, CREDIT_CAP};
use clap::Parser;
use floodgate_proto::MessageType;
use std::net::SocketAddr;
use std::time::Duration;

/// CLI arguments for the feed server.
#[derive(Parser, Debug, Clone)]
#[command(name = "floodgate")]
#[command(about = "Feed server with per-source flood protection")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "FLOODGATE_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the admin and metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "FLOODGATE_ADMIN")]
    pub admin_addr: SocketAddr,
    /// Enforce captchas on flooding sources.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "FLOODGATE_CAPTCHA")]
    pub captcha: bool,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "100000", env = "FLOODGATE_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum connections still in the WebSocket handshake.
    #[arg(long, default_value = "1000", env = "FLOODGATE_MAX_PENDING")]
    pub max_pending: usize,
    /// WebSocket handshake timeout in seconds.
    #[arg(long, default_value = "5", env = "FLOODGATE_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout: u64,
    /// Maximum WebSocket message size in bytes.
    #[arg(long, default_value = "65536", env = "FLOODGATE_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "FLOODGATE_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    #[arg(long, default_value = "120", env = "FLOODGATE_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
    /// Period of the idle source sweep in seconds.
    #[arg(long, default_value_t = SWEEP_INTERVAL.as_secs(), env = "FLOODGATE_SWEEP_INTERVAL")]
    pub sweep_interval: u64,
    /// Seconds a source may stay untouched before it is forgotten.
    #[arg(long, default_value_t = IDLE_EXPIRY.as_secs(), env = "FLOODGATE_IDLE_EXPIRY")]
    pub idle_expiry: u64,
    /// Comma-separated proxy networks whose `X-Forwarded-For` is trusted.
    #[arg(long, value_delimiter = ',', env = "FLOODGATE_TRUSTED_PROXIES")]
    pub trusted_proxies: Vec<Cidr>,
    /// Cost of creating a post, in milliseconds.
    #[arg(long, default_value = "15000", env = "FLOODGATE_POST_SCORE")]
    pub post_score_ms: u64,
    /// Cost of inserting an image, in milliseconds.
    #[arg(long, default_value = "15000", env = "FLOODGATE_IMAGE_SCORE")]
    pub image_score_ms: u64,
    /// Cost of each typed character, in milliseconds.
    #[arg(long, default_value = "170", env = "FLOODGATE_CHAR_SCORE")]
    pub char_score_ms: u64,
}

/// Cost charged to a source for each kind of action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreTable {
    /// Creating a post.
    pub post: Duration,
    /// Inserting an image.
    pub image: Duration,
    /// Each character appended, removed or spliced in.
    pub character: Duration,
}

impl ScoreTable {
    /// Cost of a client frame of type `typ` carrying `payload_len` bytes.
    #[must_use]
    pub fn cost(&self, typ: MessageType, payload_len: usize) -> Duration {
        match typ {
            MessageType::InsertPost => self.post,
            MessageType::InsertImage => self.image,
            MessageType::Append | MessageType::Backspace => self.character,
            MessageType::Splice => {
                let chars = u32::try_from(payload_len).unwrap_or(u32::MAX);
                self.character.saturating_mul(chars)
            }
            _ => Duration::ZERO,
        }
    }
}

impl Default for ScoreTable {
    fn default() -> Self {
        Self {
            post: Duration::from_millis(15_000),
            image: Duration::from_millis(15_000),
            character: Duration::from_millis(170),
        }
    }
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the admin and metrics endpoint.
    pub admin_addr: SocketAddr,
    /// Initial state of captcha enforcement.
    pub captcha: bool,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum connections still in the WebSocket handshake.
    pub max_pending: usize,
    /// WebSocket handshake timeout.
    pub handshake_timeout: Duration,
    /// Maximum WebSocket message size in bytes.
    pub max_payload: usize,
    /// Interval between WebSocket pings.
    pub ping_interval: Duration,
    /// Connection idle timeout.
    pub idle_timeout: Duration,
    /// Period of the idle source sweep.
    pub sweep_interval: Duration,
    /// How long a source may stay untouched before it is forgotten.
    pub idle_expiry: Duration,
    /// Proxies whose `X-Forwarded-For` header is trusted.
    pub trusted_proxies: Vec<Cidr>,
    /// Per-action costs.
    pub scores: ScoreTable,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.max_pending == 0 {
            return Err("max_pending must be greater than 0".to_string());
        }
        if self.max_pending > self.max_conns {
            return Err("max_pending cannot exceed max_conns".to_string());
        }

        if self.handshake_timeout.is_zero() {
            return Err("handshake_timeout must be greater than 0".to_string());
        }
        if self.handshake_timeout > Duration::from_secs(300) {
            return Err("handshake_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        const MAX_ALLOWED_PAYLOAD: usize = 16 * 1024 * 1024;
        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > MAX_ALLOWED_PAYLOAD {
            return Err(format!(
                "max_payload exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_PAYLOAD
            ));
        }

        if self.ping_interval.is_zero() {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > Duration::from_secs(3600) {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > Duration::from_secs(86_400) {
            return Err(
                "idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be greater than 0".to_string());
        }
        if self.sweep_interval > Duration::from_secs(86_400) {
            return Err("sweep_interval exceeds reasonable limit (86400 seconds)".to_string());
        }

        // A shorter expiry would forget sources that still hold banked credit
        if self.idle_expiry < CREDIT_CAP {
            return Err(format!(
                "idle_expiry must be at least {} seconds",
                CREDIT_CAP.as_secs()
            ));
        }

        // A single action costing more than the abuse lead is always spam
        for (name, cost) in [
            ("post_score", self.scores.post),
            ("image_score", self.scores.image),
            ("char_score", self.scores.character),
        ] {
            if cost > ABUSE_LEAD {
                return Err(format!(
                    "{name} exceeds reasonable limit ({} ms)",
                    ABUSE_LEAD.as_millis()
                ));
            }
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            admin_addr: args.admin_addr,
            captcha: args.captcha,
            max_conns: args.max_conns,
            max_pending: args.max_pending,
            handshake_timeout: Duration::from_secs(args.handshake_timeout),
            max_payload: args.max_payload,
            ping_interval: Duration::from_secs(args.ping_interval),
            idle_timeout: Duration::from_secs(args.idle_timeout),
            sweep_interval: Duration::from_secs(args.sweep_interval),
            idle_expiry: Duration::from_secs(args.idle_expiry),
            trusted_proxies: args.trusted_proxies,
            scores: ScoreTable {
                post: Duration::from_millis(args.post_score_ms),
                image: Duration::from_millis(args.image_score_ms),
                character: Duration::from_millis(args.char_score_ms),
            },
        }
    }
}
