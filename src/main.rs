use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use varnish_xkey::{
    application::{
        error::AppError,
        headers::{HeaderEmitter, HeaderInput},
        invalidation::CacheInvalidator,
        session::SessionGate,
        ttl::TtlResolver,
    },
    config,
    domain::{
        keys::{CacheTag, ContentId, tags_for},
        layout::ContentItem,
        purge::PurgeReport,
    },
    infra::{
        error::InfraError,
        http::{self, AdminState, EdgeState},
        purge::{BroadcastConfig, HttpPurgeBroadcaster},
        telemetry,
    },
};

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

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
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
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
        config::Command::Flush(args) => run_flush(settings, args).await,
        config::Command::Ttl(args) => run_ttl(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let invalidator = build_invalidator(&settings)?;
    let admin_router = http::build_admin_router(AdminState {
        invalidator: Arc::new(invalidator),
    });
    let edge_state = build_edge_state(&settings);
    let session_marker = edge_state.gate().is_enabled();
    let router = admin_router.merge(http::build_edge_router(edge_state));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "varnish_xkey::serve",
        addr = %settings.server.addr,
        site = %settings.site.key,
        targets = settings.varnish.targets.len(),
        enabled = settings.varnish.enabled,
        session_marker,
        "Listening"
    );
    if settings.varnish.targets.is_empty() {
        warn!(
            target = "varnish_xkey::serve",
            "No purge targets configured; purge requests will fail"
        );
    }

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let invalidator = build_invalidator(&settings)?;
    let tag = CacheTag::raw(args.tag)?;
    let report = invalidator.purge_tag(&tag).await?;
    print_report(&report)
}

async fn run_flush(settings: config::Settings, args: config::FlushArgs) -> Result<(), AppError> {
    let invalidator = build_invalidator(&settings)?;
    let content_id = args.content_id.map(ContentId::new).transpose()?;
    let report = invalidator.flush(content_id.as_ref()).await?;
    print_report(&report)
}

async fn run_ttl(settings: config::Settings, args: config::TtlArgs) -> Result<(), AppError> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let item: ContentItem = serde_json::from_str(&raw).map_err(|err| {
        AppError::validation(format!(
            "`{}` is not a content item document: {err}",
            args.file.display()
        ))
    })?;

    let resolver = TtlResolver::new(settings.ttl.clone());
    let ttl = resolver.resolve(Some(&item));
    let headers = HeaderEmitter::new().build(&HeaderInput {
        enabled: settings.varnish.enabled,
        debug: settings.varnish.debug,
        session_active: false,
        ttl,
        tags: tags_for(&settings.site.key, item.id.as_ref()),
    });

    println!("ttl: {ttl}");
    for header in headers.iter() {
        println!("{}: {}", header.name, header.value);
    }
    Ok(())
}

fn build_invalidator(settings: &config::Settings) -> Result<CacheInvalidator, AppError> {
    let mut broadcast = BroadcastConfig::new(
        settings.varnish.targets.clone(),
        settings.varnish.timeout,
    );
    if settings.varnish.protection
        && let Some(cdn) = settings.varnish.cdn_endpoint.clone()
    {
        broadcast = broadcast.with_protection(cdn);
    }
    let broadcaster = HttpPurgeBroadcaster::new(broadcast)?;

    Ok(
        CacheInvalidator::new(settings.site.key.clone(), Arc::new(broadcaster))
            .with_events(settings.invalidation.events.iter().copied()),
    )
}

fn build_edge_state(settings: &config::Settings) -> EdgeState {
    EdgeState::new(
        settings.site.key.clone(),
        settings.varnish.enabled,
        settings.varnish.debug,
        TtlResolver::new(settings.ttl.clone()),
        HeaderEmitter::new(),
        SessionGate::new(settings.session.clone()),
    )
}

/// Print the report as JSON. Fails only when no backend accepted the purge.
fn print_report(report: &PurgeReport) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
    println!("{json}");

    if report.succeeded().next().is_none() {
        return Err(AppError::from(InfraError::http_client(report.to_string())));
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(
            target = "varnish_xkey::serve",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "varnish_xkey::serve", "Shutting down");
}
