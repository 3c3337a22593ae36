use std::process;
use std::sync::Arc;

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use chrono::Utc;
use paperwall::{
    application::{
        error::AppError,
        fetcher::{FetchOptions, Fetcher},
        images::{ImageService, ResolveOptions},
        jobs::{FetchJobContext, daily_fetch_schedule, process_daily_fetch_job},
        retention::RetentionCollector,
    },
    config,
    domain::region::Region,
    infra::{
        archive::HttpArchiveClient,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        store::{FsObjectStore, ObjectStore},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Fetch(args) => run_fetch(settings, args.region).await,
        config::Command::Collect(_) => run_collect(settings).await,
    }
}

/// Everything the subcommands share: repositories, storage, the upstream
/// client and the services built on top of them.
struct AppContext {
    db: Arc<PostgresRepositories>,
    fetcher: Arc<Fetcher>,
    retention: Arc<RetentionCollector>,
    store: Arc<dyn ObjectStore>,
    fetch_options: Arc<FetchOptions>,
    default_region: Region,
}

async fn build_context(settings: &config::Settings) -> Result<AppContext, AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database.url is required"))?;

    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    let db = Arc::new(PostgresRepositories::new(pool));

    let store: Arc<dyn ObjectStore> = Arc::new(
        FsObjectStore::new(
            settings.storage.root.clone(),
            settings.storage.public_url_prefix.clone(),
        )
        .map_err(InfraError::from)?,
    );

    let archive = Arc::new(
        HttpArchiveClient::new(
            settings.upstream.api_base.clone(),
            settings.upstream.asset_base.clone(),
            settings.upstream.timeout,
        )
        .map_err(|err| AppError::unexpected(format!("upstream client: {err}")))?,
    );

    let fetcher = Arc::new(Fetcher::new(
        archive,
        Arc::clone(&db) as _,
        Arc::clone(&db) as _,
        Arc::clone(&store),
    ));
    let retention = Arc::new(RetentionCollector::new(
        Arc::clone(&db) as _,
        Arc::clone(&db) as _,
        Arc::clone(&store),
    ));

    let fetch_options = Arc::new(FetchOptions {
        regions: settings.fetch.regions.clone(),
        default_region: settings.fetch.default_region.clone(),
        write_daily_files: settings.preview.write_daily_files,
        preview_dir: settings.preview.directory.clone(),
    });

    Ok(AppContext {
        db,
        fetcher,
        retention,
        store,
        fetch_options,
        default_region: settings.fetch.default_region.clone(),
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let ctx = build_context(&settings).await?;

    let images = Arc::new(ImageService::new(
        Arc::clone(&ctx.db) as _,
        Arc::clone(&ctx.db) as _,
        Arc::clone(&ctx.fetcher),
        ResolveOptions {
            default_region: ctx.default_region.clone(),
            on_demand_fetch: settings.fetch.on_demand,
            region_fallback: settings.fetch.region_fallback,
        },
        Arc::clone(&ctx.fetch_options),
    ));

    if settings.scheduler.enabled {
        spawn_job_monitor(&ctx, settings.retention.days, &settings.scheduler.cron)?;
    } else {
        info!("scheduled acquisition disabled by configuration");
    }

    let state = HttpState {
        images,
        store: Arc::clone(&ctx.store),
        db: Arc::clone(&ctx.db),
        default_region: ctx.default_region.clone(),
    };
    let router = http::router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.public_addr, "listening");

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

fn spawn_job_monitor(
    ctx: &AppContext,
    retention_days: u32,
    cron: &str,
) -> Result<(), AppError> {
    // Validated at config load; re-parsing here keeps the call sites honest.
    let schedule = daily_fetch_schedule(Some(cron))
        .map_err(|err| AppError::unexpected(format!("cron schedule: {err}")))?;

    let job_ctx = FetchJobContext {
        fetcher: Arc::clone(&ctx.fetcher),
        retention: Arc::clone(&ctx.retention),
        options: Arc::clone(&ctx.fetch_options),
        retention_days,
    };

    let worker = WorkerBuilder::new("daily-fetch-worker")
        .data(job_ctx)
        .backend(CronStream::new(schedule))
        .build_fn(process_daily_fetch_job);

    let monitor = Monitor::new().register(worker);
    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    });

    Ok(())
}

async fn run_fetch(settings: config::Settings, region: Option<String>) -> Result<(), AppError> {
    let ctx = build_context(&settings).await?;

    match region {
        Some(code) => ctx
            .fetcher
            .fetch_region(&code, &ctx.fetch_options)
            .await
            .map_err(|err| AppError::unexpected(err.to_string()))?,
        None => ctx.fetcher.fetch_all(&ctx.fetch_options).await,
    }

    Ok(())
}

async fn run_collect(settings: config::Settings) -> Result<(), AppError> {
    let ctx = build_context(&settings).await?;
    let removed = ctx
        .retention
        .collect(Utc::now().date_naive(), settings.retention.days)
        .await?;
    info!(removed, "retention sweep finished");
    Ok(())
}
