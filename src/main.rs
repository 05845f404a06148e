use std::{process, sync::Arc, time::Duration};

use postsync::{
    application::{
        coordinator::{PostCoordinator, UpdatePostCommand},
        error::AppError,
        repos::{PostCache, PostStore, SearchIndex},
    },
    config::{self, Command, CreateArgs, Settings, UpdateArgs},
    domain::posts::NewPost,
    infra::{
        cache::{DisabledPostCache, RedisPostCache},
        db::PostgresRepositories,
        error::InfraError,
        search::{DisabledSearchIndex, ElasticsearchIndex},
        telemetry,
    },
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const CACHE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(
            source = report.source,
            user_error = error.is_user_error(),
            error = %report.chain(),
            "application error"
        );
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, error = %report.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let command = cli_args.command.unwrap_or(Command::Health);
    let store = init_primary_store(&settings, matches!(command, Command::Init)).await?;
    let cache = init_cache(&settings).await;
    let index = init_search_index(&settings);

    let coordinator = PostCoordinator::new(store, cache, index, settings.coordinator_settings());
    let outcome = prepare_and_execute(&coordinator, &settings, command).await;

    coordinator.shutdown(settings.search.shutdown_grace).await;
    outcome
}

async fn init_primary_store(
    settings: &Settings,
    migrate: bool,
) -> Result<Arc<dyn PostStore>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    if migrate {
        PostgresRepositories::run_migrations(&pool)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
        info!("database migrations applied");
    }

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn init_cache(settings: &Settings) -> Arc<dyn PostCache> {
    if !settings.cache.enabled {
        info!("cache disabled by configuration");
        return Arc::new(DisabledPostCache);
    }

    match RedisPostCache::connect(
        &settings.cache.url,
        CACHE_CONNECT_TIMEOUT,
        settings.cache.timeout,
    )
    .await
    {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            warn!(error = %err, "cache unreachable at startup; continuing without it");
            Arc::new(DisabledPostCache)
        }
    }
}

fn init_search_index(settings: &Settings) -> Arc<dyn SearchIndex> {
    if !settings.search.enabled {
        info!("search index disabled by configuration");
        return Arc::new(DisabledSearchIndex);
    }

    match ElasticsearchIndex::new(
        &settings.search.url,
        &settings.search.index,
        settings.search.timeout,
    ) {
        Ok(index) => Arc::new(index),
        Err(err) => {
            warn!(error = %err, "search index misconfigured; continuing without it");
            Arc::new(DisabledSearchIndex)
        }
    }
}

async fn prepare_and_execute(
    coordinator: &PostCoordinator,
    settings: &Settings,
    command: Command,
) -> Result<(), AppError> {
    if let Err(err) = coordinator.ensure_search_schema().await {
        if matches!(command, Command::Init) {
            return Err(AppError::SearchSchema(err));
        }
        warn!(
            index = %settings.search.index,
            error = %err,
            "search schema check failed; text search may be unavailable"
        );
    }

    execute(coordinator, command).await
}

async fn execute(coordinator: &PostCoordinator, command: Command) -> Result<(), AppError> {
    match command {
        Command::Init => {
            info!("initialization complete");
            print_json(&coordinator.health().await)
        }
        Command::Health => {
            let report = coordinator.health().await;
            print_json(&report)?;
            if report.is_serving() {
                Ok(())
            } else {
                Err(AppError::from(InfraError::database(
                    "primary store failed its health check",
                )))
            }
        }
        Command::Create(args) => {
            let post = coordinator.create(new_post(args)?).await?;
            print_json(&post)
        }
        Command::Get(args) => print_json(&coordinator.get_by_id(args.id).await?),
        Command::Update(args) => {
            let post = coordinator.update(update_command(args)?).await?;
            print_json(&post)
        }
        Command::ByTag(args) => print_json(&coordinator.search_by_tag(&args.tag).await?),
        Command::Search(args) => print_json(&coordinator.search_by_text(&args.query).await?),
    }
}

fn new_post(args: CreateArgs) -> Result<NewPost, AppError> {
    NewPost::new(args.title, args.content, args.tags).map_err(AppError::from)
}

fn update_command(args: UpdateArgs) -> Result<UpdatePostCommand, AppError> {
    let UpdateArgs {
        id,
        title,
        content,
        tags,
        clear_tags,
    } = args;

    let mut command = UpdatePostCommand::new(id);
    if let Some(title) = title {
        command = command.with_title(title)?;
    }
    if let Some(content) = content {
        command = command.with_content(content)?;
    }
    if clear_tags {
        command = command.with_tags(Vec::new());
    } else if !tags.is_empty() {
        command = command.with_tags(tags);
    }
    Ok(command)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
