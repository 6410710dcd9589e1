use std::{sync::Arc, time::Duration};

use demobot_core::{
    api::BotApi,
    config::{Config, EngineConfig},
    engine::{CommandContext, Engine, InlineContext},
    fault::{FaultReporter, TracingFaultReporter},
    messaging::{
        port::BotTransport,
        types::{ApiArgs, InlineButton, InlineKeyboard},
    },
    Error,
};
use demobot_telegram::HttpTransport;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const QUESTION_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    demobot_core::logging::init("demobot")?;

    let cfg = Config::load()?;
    let transport: Arc<dyn BotTransport> = Arc::new(HttpTransport::from_config(&cfg)?);
    let reporter: Arc<dyn FaultReporter> = Arc::new(TracingFaultReporter);

    tracing::info!(
        bot = %cfg.engine.bot_username,
        api = %cfg.telegram_api_url,
        "demobot starting"
    );

    // Restarts resume from where the failed worker stopped.
    let mut offset = cfg.engine.initial_offset;
    loop {
        let engine = Engine::start(
            EngineConfig {
                initial_offset: offset,
                ..cfg.engine.clone()
            },
            transport.clone(),
            reporter.clone(),
        );
        register(&engine)?;
        announce(&engine).await;

        tokio::select! {
            res = engine.wait() => {
                offset = engine.offset();
                match res {
                    Ok(()) => return Ok(()),
                    Err(e) => tracing::error!(
                        restart_in_secs = cfg.restart_delay.as_secs(),
                        "engine failed: {e}"
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                engine.shutdown();
                if let Err(e) = engine.wait().await {
                    tracing::warn!("engine stopped with error during shutdown: {e}");
                }
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.restart_delay) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn announce(engine: &Engine) {
    match engine.submit("getMe", ApiArgs::new()).await {
        Ok(me) => {
            let username = me.get("username").and_then(|v| v.as_str()).unwrap_or("?");
            tracing::info!("demobot started: @{username}");
        }
        Err(e) => tracing::warn!("getMe failed: {e}"),
    }
}

fn register(engine: &Engine) -> demobot_core::Result<()> {
    engine.add_command_listener(
        "start",
        |ctx: CommandContext| async move {
            BotApi::new(ctx.engine)
                .send_message(
                    ctx.chat_id,
                    "Hi! Try /ping, or /ask followed by a yes/no question.",
                )
                .await?;
            Ok::<_, Error>(())
        },
        COMMAND_TIMEOUT,
    )?;

    engine.add_command_listener(
        "ping",
        |ctx: CommandContext| async move {
            BotApi::new(ctx.engine).send_message(ctx.chat_id, "pong").await?;
            Ok::<_, Error>(())
        },
        COMMAND_TIMEOUT,
    )?;

    engine.add_command_listener("ask", ask, COMMAND_TIMEOUT)?;
    Ok(())
}

async fn ask(ctx: CommandContext) -> demobot_core::Result<()> {
    let api = BotApi::new(ctx.engine.clone());
    let question = if ctx.args.is_empty() {
        "Do you like this bot?".to_string()
    } else {
        ctx.args.clone()
    };

    let keyboard = InlineKeyboard::single_row(vec![
        InlineButton::new("Yes", "yes"),
        InlineButton::new("No", "no"),
    ]);
    let sent = api
        .send_inline_question(ctx.chat_id, &question, &keyboard, answered, QUESTION_TIMEOUT)
        .await;
    if let Err(e) = sent {
        api.send_error_message(ctx.chat_id, &e).await?;
    }
    Ok(())
}

async fn answered(ctx: InlineContext) -> demobot_core::Result<()> {
    let api = BotApi::new(ctx.engine.clone());
    api.answer_callback_query(&ctx.callback_query_id, None).await?;

    let reply = match ctx.data.as_str() {
        "yes" => "You said yes.",
        "no" => "You said no.",
        other => {
            tracing::debug!(data = other, "unexpected button payload");
            return Ok(());
        }
    };
    api.send_message(ctx.chat_id, reply).await?;
    Ok(())
}
