use std::sync::Arc;

use chrono::Utc;
use notification_sync::{
    FetchRequest, NotificationEngine, ReadMutations, ReqwestHttpClient, Scope, SnapshotFetcher,
    WsPushTransport,
};
use tracing::{debug, info};

use crate::{
    cli::{OutputFormat, ScopeArgs},
    config::AppConfig,
    error::{AppError, Result},
    output::OutputManager,
};

pub struct CommandExecutor {
    config: AppConfig,
    output: OutputManager,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, colored: bool) -> Self {
        Self {
            config,
            output: OutputManager::new(colored),
        }
    }

    /// Command-line scope, falling back to the configured defaults.
    pub fn resolve_scope(&self, args: &ScopeArgs) -> Result<Scope> {
        let role = args
            .role
            .as_deref()
            .or(self.config.role.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(AppError::MissingRole)?;
        let recipient = args
            .recipient
            .clone()
            .or_else(|| self.config.recipient_id.clone())
            .filter(|r| !r.trim().is_empty());
        Ok(Scope::new(role, recipient))
    }

    fn http(&self) -> Result<Arc<ReqwestHttpClient>> {
        Ok(Arc::new(ReqwestHttpClient::new(&self.config.http)?))
    }

    /// Run the engine and re-render on every change until Ctrl-C.
    pub async fn watch(
        &self,
        scope_args: &ScopeArgs,
        poll: Option<u64>,
        format: OutputFormat,
    ) -> Result<()> {
        let scope = self.resolve_scope(scope_args)?;
        let mut engine_config = self.config.engine.clone();
        if poll.is_some() {
            engine_config.poll_interval_secs = poll;
        }

        let engine = NotificationEngine::new(
            engine_config,
            self.http()?,
            Arc::new(WsPushTransport::new(self.config.push.clone())),
        );
        let mut views = engine.subscribe();
        engine.start(scope).await;

        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        loop {
            tokio::select! {
                _ = &mut interrupted => {
                    info!("Interrupted, stopping");
                    break;
                }
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    if view.scope.is_none() {
                        continue;
                    }
                    if !format.is_json() {
                        println!();
                    }
                    println!("{}", self.output.format_view(&view, format, Utc::now())?);
                }
            }
        }

        engine.stop().await;
        Ok(())
    }

    /// One-shot snapshot fetch.
    pub async fn list(
        &self,
        scope_args: &ScopeArgs,
        limit: Option<usize>,
        unread_only: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let scope = self.resolve_scope(scope_args)?;
        let request = FetchRequest::new(scope, limit.unwrap_or(self.config.engine.fetch_limit));
        let mut records = SnapshotFetcher::new(self.http()?).fetch(&request).await?;
        if unread_only {
            records.retain(|r| !r.is_read);
        }
        debug!(count = records.len(), "Listing notifications");

        print!(
            "{}",
            self.output.format_records(&records, format, Utc::now())?
        );
        if format.is_json() {
            println!();
        }
        Ok(())
    }

    pub async fn read(&self, id: &str, scope_args: &ScopeArgs) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::InvalidInput("notification id is empty".to_string()));
        }
        let scope = self.resolve_scope(scope_args)?;
        ReadMutations::new(self.http()?).mark_read(&scope, id).await?;
        println!("{}", self.output.success(&format!("Marked #{id} as read")));
        Ok(())
    }

    pub async fn read_all(&self, scope_args: &ScopeArgs) -> Result<()> {
        let scope = self.resolve_scope(scope_args)?;
        ReadMutations::new(self.http()?).mark_all_read(&scope).await?;
        println!(
            "{}",
            self.output
                .success(&format!("Marked all notifications for {scope} as read"))
        );
        Ok(())
    }
}
