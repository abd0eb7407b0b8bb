//! Build command - run the lifecycle against application source

use crate::builder::BuilderImage;
use crate::cli::args::BuildArgs;
use crate::config::schema::ProxyConfig;
use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use crate::lifecycle::{Lifecycle, LifecycleOptions, LifecycleSettings};
use crate::orchestration::create_runtime;
use console::style;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exit status for a forced second interrupt (128 + SIGINT)
const INTERRUPT_EXIT_CODE: i32 = 130;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config, verbose: bool) -> PackResult<()> {
    let image = ImageRef::parse(&args.image)?;
    let app_path = app_path(args.path.as_ref())?;

    let runtime = create_runtime(&config.runtime)?;
    debug!("Using runtime: {}", runtime.runtime_name());
    runtime.ensure_ready().await?;

    let builder_name = args.builder.as_deref().unwrap_or(&config.build.builder);
    let builder = BuilderImage::inspect(runtime.as_ref(), builder_name).await?;

    let opts = LifecycleOptions {
        app_path,
        image: image.clone(),
        builder: Arc::new(builder),
        run_image: args.run_image.or_else(|| config.build.run_image.clone()),
        clear_cache: args.clear_cache,
        publish: args.publish,
        network: args.network.or_else(|| config.build.network.clone()),
        proxy: proxy_settings(&args.http_proxy, &args.https_proxy, &args.no_proxy, &config.proxy),
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_repeated(&interrupt) {
                eprintln!(
                    "{} Interrupted again, exiting without cleanup",
                    style("Error:").red().bold()
                );
                std::process::exit(INTERRUPT_EXIT_CODE);
            }
        }
    });

    let mut lifecycle = Lifecycle::new(runtime)
        .with_settings(LifecycleSettings::from(&config.runtime))
        .verbose(verbose);

    lifecycle.execute(&cancel, opts).await?;

    println!(
        "{} Successfully built image {}",
        style("✓").green(),
        style(image).cyan()
    );
    Ok(())
}

fn app_path(path: Option<&PathBuf>) -> PackResult<PathBuf> {
    match path {
        Some(path) => Ok(path.clone()),
        None => env::current_dir().map_err(|e| PackError::io("getting current directory", e)),
    }
}

/// CLI flags win, then config, then the environment
fn proxy_settings(
    http: &Option<String>,
    https: &Option<String>,
    no_proxy: &Option<String>,
    config: &ProxyConfig,
) -> ProxyConfig {
    ProxyConfig {
        http: http.clone().or_else(|| config.http.clone()),
        https: https.clone().or_else(|| config.https.clone()),
        no_proxy: no_proxy.clone().or_else(|| config.no_proxy.clone()),
    }
    .with_env_fallback()
}

/// Handle one Ctrl-C. The first cancels the build so cleanup can run;
/// returns true when the build was already cancelled.
fn interrupt_repeated(cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    warn!("Interrupted, stopping build (Ctrl-C again to exit immediately)");
    cancel.cancel();
    false
}
