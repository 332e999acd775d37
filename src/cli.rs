use crate::{
    install_prometheus, output_filename, serve, AppState, ChromiumFactory, Config, EngineFactory,
    Headers, Job, JobKind, Metrics, ProgressTracker, RenderContent, RenderService,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long running jobs get to finish once shutdown starts
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "render-pool")]
#[command(about = "Render web pages to HTML or PNG with a pool of headless browsers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Number of pooled engines")]
    pub pool_size: Option<usize>,

    #[arg(long, global = true, help = "Default job timeout in milliseconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Cli {
    /// Apply command-line flags on top of an already layered config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(timeout) = self.timeout {
            config.job_timeout = Duration::from_millis(timeout);
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Commands::Serve { host, port } = &self.command {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve POST /html and POST /png over HTTP
    Serve {
        #[arg(long, help = "Bind address")]
        host: Option<String>,

        #[arg(short, long, help = "Server port")]
        port: Option<u16>,
    },

    /// Render a single URL
    Render {
        url: String,

        #[arg(long, requires = "output", help = "Capture a PNG instead of extracting HTML")]
        png: bool,

        #[arg(short, long, help = "Output file path (HTML goes to stdout when omitted)")]
        output: Option<PathBuf>,

        #[arg(long = "header", value_parser = parse_header, help = "Extra request header, \"Name: value\"")]
        headers: Vec<(String, String)>,

        #[arg(long, help = "Proxy rule for this job; an empty string disables the default")]
        proxy: Option<String>,
    },

    /// Render every URL listed in a file
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, help = "Output directory")]
        output: PathBuf,

        #[arg(long, help = "Capture PNGs instead of extracting HTML")]
        png: bool,
    },

    /// Validate configuration
    Validate,
}

/// Parse a `Name: value` header argument.
pub fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got \"{raw}\""))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in \"{raw}\""));
    }

    Ok((name.to_string(), value.trim().to_string()))
}

pub struct CliRunner {
    pub config: Config,
    factory: Arc<dyn EngineFactory>,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        let factory = Arc::new(ChromiumFactory::new(&config));
        Self::with_factory(config, factory)
    }

    pub fn with_factory(config: Config, factory: Arc<dyn EngineFactory>) -> Self {
        Self { config, factory }
    }

    /// Run `command`, stopping early when `shutdown` resolves.
    pub async fn run<F>(&self, command: Commands, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match command {
            Commands::Serve { .. } => self.run_server(shutdown).await,
            Commands::Render {
                url,
                png,
                output,
                headers,
                proxy,
            } => {
                if png && output.is_none() {
                    bail!("PNG output needs --output");
                }

                let mut job = Job::new(kind_for(png), url);
                job.headers = headers.into_iter().collect::<Headers>();
                job.proxy = proxy;

                let service = self.start_service(Arc::new(Metrics::new())).await?;
                let result = tokio::select! {
                    result = self.run_single(&service, job, output.as_deref()) => result,
                    _ = shutdown => {
                        warn!("Interrupted before the render finished");
                        Ok(())
                    }
                };
                service.shutdown(SHUTDOWN_GRACE).await;
                result
            }
            Commands::Batch { input, output, png } => {
                let service = self.start_service(Arc::new(Metrics::new())).await?;
                let result = tokio::select! {
                    result = self.run_batch(&service, &input, &output, kind_for(png)) => result,
                    _ = shutdown => {
                        warn!("Interrupted before the batch finished");
                        Ok(())
                    }
                };
                service.shutdown(SHUTDOWN_GRACE).await;
                result
            }
            Commands::Validate => self.validate_config(),
        }
    }

    async fn start_service(&self, metrics: Arc<Metrics>) -> anyhow::Result<RenderService> {
        RenderService::with_factory(self.config.clone(), self.factory.clone(), metrics)
            .await
            .context("failed to start the engine pool")
    }

    pub async fn run_server<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid bind address {}:{}",
                    self.config.server.host, self.config.server.port
                )
            })?;

        // The recorder has to exist before any metric handle is registered.
        let prometheus = if self.config.server.metrics {
            Some(install_prometheus()?)
        } else {
            None
        };

        let service = Arc::new(self.start_service(Arc::new(Metrics::new())).await?);
        let state = AppState {
            service: service.clone(),
            prometheus,
        };

        let result = serve(state, addr, shutdown).await;
        service.shutdown(SHUTDOWN_GRACE).await;
        result.context("HTTP server failed")
    }

    pub async fn run_single(
        &self,
        service: &RenderService,
        job: Job,
        output: Option<&Path>,
    ) -> anyhow::Result<()> {
        info!("Rendering {} ({})", job.target, job.kind);

        let result = service.render(job).await?;

        match (output, result.content) {
            (Some(path), content) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                let size = content.len();
                fs::write(path, content.into_bytes()).await?;

                println!("Rendered successfully:");
                println!("  URL: {}", result.target);
                println!("  Output: {}", path.display());
                println!("  Size: {}", crate::format_bytes(size));
                println!("  Duration: {}", crate::format_duration(result.duration));
            }
            (None, RenderContent::Html(html)) => println!("{html}"),
            (None, RenderContent::Png(_)) => bail!("PNG output needs --output"),
        }

        Ok(())
    }

    pub async fn run_batch(
        &self,
        service: &RenderService,
        input: &Path,
        output: &Path,
        kind: JobKind,
    ) -> anyhow::Result<()> {
        let urls = read_urls_from_file(input).await?;
        info!("Loaded {} URLs from {}", urls.len(), input.display());

        fs::create_dir_all(output).await?;

        let progress = ProgressTracker::new(urls.len());
        let jobs = urls.into_iter().map(|url| Job::new(kind, url)).collect();
        let outcomes = service.render_batch(jobs).await;

        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    let path = output.join(output_filename(&result.target, kind));
                    fs::write(&path, result.content.as_bytes()).await?;
                    progress.record_completion(true);
                    info!("Saved {}", path.display());
                }
                Err(e) => {
                    progress.record_completion(false);
                    error!("Render failed: {}", e);
                }
            }
        }

        let summary = progress.get_progress();
        println!(
            "Batch complete: {} succeeded, {} failed, {:.1} jobs/s",
            summary.success, summary.errors, summary.rate
        );

        Ok(())
    }

    pub fn validate_config(&self) -> anyhow::Result<()> {
        self.config.validate()?;

        println!("Configuration is valid:");
        println!("  Pool size: {}", self.config.pool_size);
        println!("  Job timeout: {:?}", self.config.job_timeout);
        println!(
            "  Viewport: {}x{}",
            self.config.viewport.width, self.config.viewport.height
        );
        println!(
            "  Proxy rules: {}",
            self.config.proxy_rules.as_deref().unwrap_or("(none)")
        );
        println!(
            "  Listen: {}:{}",
            self.config.server.host, self.config.server.port
        );

        Ok(())
    }
}

fn kind_for(png: bool) -> JobKind {
    if png {
        JobKind::ImageCapture
    } else {
        JobKind::ContentExtraction
    }
}

pub async fn read_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Install the fmt subscriber. `RUST_LOG` wins over `verbose` when set.
pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
