use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use herald_core::app::formatter::render_task_list;
use herald_core::app::{App, AppBuilder};
use herald_core::config::{ExecutorEntry, HeraldConfig};
use herald_core::domain::{
    Action, CallbackEvent, CallbackToken, HeraldError, InboundEvent, NewTask, RenderedMessage,
    RetryPolicy, TaskStatus,
};
use herald_core::impls::{RecordingGateway, TelegramGateway};
use herald_core::observability::init_tracing;
use herald_core::ports::MessagingGateway;

/// Back-off after a failed long-poll round.
const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = HeraldConfig::load(config_path.as_deref()).context("loading configuration")?;

    match config.gateway.token.clone() {
        Some(token) => run_bot(config, token).await,
        None => {
            info!("no gateway token configured, running the in-memory demo");
            run_demo(config).await
        }
    }
}

async fn run_bot(config: HeraldConfig, token: String) -> Result<()> {
    let gateway = Arc::new(TelegramGateway::new(token, &config.gateway));
    let app = Arc::new(
        AppBuilder::from_config(&config)
            .gateway(gateway.clone())
            .admin_channel(gateway.clone())
            .build()
            .context("building application")?,
    );
    let dispatcher = app.start().await.context("starting dispatcher")?;
    info!(executors = app.registry.len(), "bot is polling for updates");

    // One routine per update; the per-task lock orders events of the same task.
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            polled = gateway.poll_updates() => match polled {
                Ok(events) => {
                    in_flight.retain(|handle| !handle.is_finished());
                    for event in events {
                        let app = Arc::clone(&app);
                        let gateway = Arc::clone(&gateway);
                        in_flight.push(tokio::spawn(async move {
                            handle_event(&app, &gateway, event).await;
                        }));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "polling failed");
                    tokio::time::sleep(POLL_ERROR_DELAY).await;
                }
            },
        }
    }

    for handle in in_flight {
        if let Err(e) = handle.await {
            warn!(error = %e, "update handler panicked");
        }
    }
    dispatcher.shutdown_and_join().await;
    Ok(())
}

async fn handle_event(app: &App, gateway: &TelegramGateway, event: InboundEvent) {
    match event {
        InboundEvent::Callback(callback) => {
            let reply = match app.callbacks.handle(&callback).await {
                Ok(outcome) => outcome.reply_text(),
                Err(e) => {
                    error!(task_id = %callback.task_id, error = %e, "callback processing failed");
                    None
                }
            };
            if let Err(e) = gateway.answer_callback(&callback.token, reply).await {
                warn!(error = %e, "could not answer callback");
            }
        }
        InboundEvent::MalformedCallback { token, .. } => {
            if let Err(e) = gateway.answer_callback(&token, Some("Unknown action")).await {
                warn!(error = %e, "could not answer callback");
            }
        }
        InboundEvent::ListTasks { executor_id, chat } => {
            let message = match app.callbacks.open_tasks(executor_id).await {
                Ok(tasks) => render_task_list(&tasks),
                Err(HeraldError::Validation(_)) => {
                    RenderedMessage::informational("⛔ You are not on the executor list")
                }
                Err(e) => {
                    error!(%executor_id, error = %e, "listing tasks failed");
                    return;
                }
            };
            if let Err(e) = gateway.send_message(chat, &message).await {
                warn!(%chat, error = %e, "could not send task list");
            }
        }
        InboundEvent::Reply {
            executor_id,
            chat,
            task_id,
            text,
        } => match app.callbacks.handle_reply(executor_id, task_id, &text).await {
            Ok(outcome) => {
                if let Some(reply) = outcome.reply_text() {
                    let message = RenderedMessage::informational(reply);
                    if let Err(e) = gateway.send_message(chat, &message).await {
                        warn!(%chat, error = %e, "could not confirm reply");
                    }
                }
            }
            Err(e) => error!(%task_id, error = %e, "reply processing failed"),
        },
    }
}

/// Walk one task through its lifecycle without a network.
async fn run_demo(mut config: HeraldConfig) -> Result<()> {
    if config.executors.is_empty() {
        config.executors.push(ExecutorEntry {
            id: 1,
            chat_id: None,
            name: Some("Demo Executor".to_string()),
        });
    }
    let executor_id = config.allow_list()[0].id;

    let gateway = Arc::new(RecordingGateway::new());
    let app = AppBuilder::from_config(&config)
        .gateway(gateway.clone())
        .admin_channel(gateway.clone())
        .retry_policy(RetryPolicy::fixed(
            Duration::from_millis(50),
            Duration::from_millis(200),
            3,
        ))
        .build()
        .context("building application")?;
    let dispatcher = app.start().await?;

    let task = app
        .service
        .create_task(
            NewTask::administrative("Collect policy documents")
                .with_note("Passport and vehicle registration")
                .assigned_to(executor_id),
        )
        .await?;
    info!(task_id = %task.id, "demo task queued");

    let sent = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = app.service.get(task.id).await?;
            if current.status == TaskStatus::Sent {
                return Ok::<_, HeraldError>(current);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("waiting for delivery")??;
    info!(message_ref = ?sent.external_message_ref, "demo task delivered");

    let press = CallbackEvent {
        task_id: task.id,
        executor_id,
        action: Action::Complete,
        token: CallbackToken::new("demo-press-1"),
        text: None,
    };
    for _ in 0..2 {
        let outcome = app.callbacks.handle(&press).await?;
        info!(?outcome, "executor pressed complete");
    }
    app.service.confirm(task.id).await?;

    dispatcher.shutdown_and_join().await;

    let counts = app.service.counts().await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    for notice in gateway.notices() {
        println!("admin <- {}", notice.text);
    }
    Ok(())
}
