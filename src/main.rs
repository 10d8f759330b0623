use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use imageblend::server::{self, Backend};
use imageblend::services::GeminiClient;
use imageblend::settings::Settings;
use imageblend::util::init_tracing;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Backend for imageblend: serves the front end and proxies the model APIs
#[derive(Debug, Parser)]
#[command(name = "imageblend", version)]
struct Args {
    /// TOML config file (defaults to ./imageblend.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the config
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding the config
    #[arg(long)]
    port: Option<u16>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let gemini = Arc::new(GeminiClient::new(settings.gemini.options()?)?);
    info!("using {gemini:?}");
    let backend = web::Data::new(Backend::new(gemini.clone(), gemini));

    let addr = (settings.server.host.clone(), settings.server.port);
    info!("listening on http://{}:{}", addr.0, addr.1);

    // Start the HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(backend.clone())
            .wrap(middleware::Logger::default())
            .configure(server::configure)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
