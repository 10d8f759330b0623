pub mod blend;
pub mod intake;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod settings;

pub use blend::BlendMode;
pub use intake::EncodedImage;
pub use pipeline::{GenerationRequest, Pipeline, PipelineError, PipelineState, Stage};

/// Compile-time defaults. Everything here can be overridden at runtime
/// through `settings::Settings`.
pub mod config {
    /// Default `RUST_LOG` filter when none is set
    pub const RUST_LOG: &str = "imageblend=info,actix_web=info";

    /// Config file looked up in the working directory (extension optional)
    pub const CONFIG_FILE: &str = "imageblend";

    /// Prefix of environment variable overrides, e.g. `IMAGEBLEND_SERVER__PORT`
    pub const ENV_PREFIX: &str = "IMAGEBLEND";

    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8080;

    pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
    pub const GEMINI_TEXT_MODEL: &str = "gemini-2.5-flash";
    pub const GEMINI_IMAGE_MODEL: &str = "imagen-4.0-generate-001";

    /// Upper bound on one model API call issued by the backend
    pub const GEMINI_TIMEOUT_SECS: u64 = 120;

    pub const DEFAULT_DESCRIBE_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 120;

    pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8080";

    /// Largest JSON body the backend accepts (two inline images)
    pub const MAX_JSON_BODY: usize = 32 * 1024 * 1024;
}

/// Process-level helpers shared by the binaries
pub mod util {
    use tracing_subscriber::EnvFilter;

    /// Install the global tracing subscriber. `RUST_LOG` wins over the
    /// built-in default filter.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(super::config::RUST_LOG));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
