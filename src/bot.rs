use std::sync::Arc;

use anyhow::Result;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InlineQueryResult,
    InlineQueryResultArticle, InputMessageContent, InputMessageContentText, Me, ParseMode,
};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tracing::{info, warn};

use crate::config::Config;
use crate::llm::{Completer, LlmClient};

const MODEL_PREFIX: &str = "[model:";
const PREVIEW_LEN: usize = 100;
const INLINE_CACHE_SECS: u32 = 1;
/// Telegram rejects message text longer than this.
const MAX_MESSAGE_CHARS: usize = 4096;
/// Leaves headroom under `MAX_MESSAGE_CHARS`.
const MAX_CHUNK_LEN: usize = MAX_MESSAGE_CHARS - 96;
const ELLIPSIS: &str = "...";
const EMPTY_REPLY: &str = "The model returned an empty response.";

/// Models advertised by `/models`. Any other OpenRouter id works too.
const KNOWN_MODELS: &[(&str, &str)] = &[
    ("openai/gpt-4o", "GPT-4 Optimized (default)"),
    ("openai/gpt-3.5-turbo", "Faster, cheaper option"),
    ("anthropic/claude-3-sonnet", "Claude Sonnet"),
    ("meta-llama/llama-3-70b-instruct", "Llama 3"),
];

/// Shared application state. Immutable after startup.
pub struct AppState {
    pub config: Config,
    pub llm: Box<dyn Completer>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let llm = Box::new(LlmClient::new(config.llm.clone()));
        Self { config, llm }
    }

    fn default_model(&self) -> &str {
        &self.config.llm.model
    }
}

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,
    #[command(description = "Show this help message")]
    Help,
    #[command(description = "List available AI models")]
    Models,
}

/// Where an incoming message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Command,
    Relay,
    Ignore,
}

/// Commands are answered in any chat; other text is relayed only from
/// private chats.
pub fn route_message(text: Option<&str>, is_private: bool, bot_username: &str) -> Route {
    match text {
        None => Route::Ignore,
        Some(t) if Command::parse(t, bot_username).is_ok() => Route::Command,
        Some(_) if is_private => Route::Relay,
        Some(_) => Route::Ignore,
    }
}

/// A parsed inline query: which model to ask and what to ask it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineRequest {
    pub model: String,
    pub query: String,
}

/// Split an optional `[model:<id>]` prefix off an inline query.
///
/// An unterminated prefix is not an error: the whole trimmed query is used
/// with the default model.
pub fn parse_inline_query(raw: &str, default_model: &str) -> InlineRequest {
    let query = raw.trim();

    if let Some(rest) = query.strip_prefix(MODEL_PREFIX) {
        if let Some(end) = rest.find(']') {
            return InlineRequest {
                model: rest[..end].to_string(),
                query: rest[end + 1..].trim().to_string(),
            };
        }
    }

    InlineRequest {
        model: default_model.to_string(),
        query: query.to_string(),
    }
}

/// Keep the first `keep` characters of `text`, appending `...` if anything was cut.
fn truncate_chars(text: &str, keep: usize) -> Option<String> {
    text.char_indices()
        .nth(keep)
        .map(|(cut, _)| format!("{}{}", &text[..cut], ELLIPSIS))
}

/// First 100 characters of `answer`, with `...` appended if anything was cut.
pub fn preview(answer: &str) -> String {
    truncate_chars(answer, PREVIEW_LEN).unwrap_or_else(|| answer.to_string())
}

/// HTML body of the inline result. The answer is shortened so the visible
/// text stays within `MAX_MESSAGE_CHARS`.
fn inline_body(query: &str, answer: &str) -> String {
    let frame = format!("Question: {}\n\nAnswer:\n", query).chars().count();
    let keep = MAX_MESSAGE_CHARS
        .saturating_sub(frame)
        .saturating_sub(ELLIPSIS.len());

    let answer = match truncate_chars(answer, keep) {
        Some(short) => {
            warn!(
                "Inline answer of {} chars truncated to fit Telegram's message limit",
                answer.chars().count()
            );
            short
        }
        None => answer.to_string(),
    };

    format!(
        "<b>Question:</b> {}\n\n<b>Answer:</b>\n{}",
        html::escape(query),
        html::escape(&answer)
    )
}

fn placeholder_result() -> InlineQueryResult {
    InlineQueryResult::Article(
        InlineQueryResultArticle::new(
            "1",
            "💡 Ask me anything!",
            InputMessageContent::Text(InputMessageContentText::new(
                "Please type a question after the bot username!",
            )),
        )
        .description("Type your question here..."),
    )
}

fn answer_result(query: &str, answer: &str) -> InlineQueryResult {
    let keyboard = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::switch_inline_query_current_chat("🔄 Ask Another", ""),
    ]]);

    InlineQueryResult::Article(
        InlineQueryResultArticle::new(
            "1",
            "🤖 AI Response",
            InputMessageContent::Text(
                InputMessageContentText::new(inline_body(query, answer))
                    .parse_mode(ParseMode::Html),
            ),
        )
        .description(preview(answer))
        .reply_markup(keyboard),
    )
}

/// Build the results for one inline query update. Blank queries get a
/// placeholder without touching the completion service.
pub async fn inline_results(
    llm: &dyn Completer,
    raw_query: &str,
    default_model: &str,
) -> Vec<InlineQueryResult> {
    if raw_query.trim().is_empty() {
        return vec![placeholder_result()];
    }

    let request = parse_inline_query(raw_query, default_model);
    let answer = llm.get_completion(&request.query, &request.model).await;

    vec![answer_result(&request.query, &answer)]
}

/// Answer a private message with the default model. Telegram refuses blank
/// messages, so an empty answer becomes a short notice.
pub async fn private_reply(llm: &dyn Completer, text: &str, default_model: &str) -> String {
    let reply = llm.get_completion(text, default_model).await;
    if reply.trim().is_empty() {
        EMPTY_REPLY.to_string()
    } else {
        reply
    }
}

pub fn start_text(username: &str) -> String {
    format!(
        "🤖 <b>Welcome to AI Chat Bot!</b>\n\n\
         You can use me in two ways:\n\n\
         1️⃣ <b>Direct Chat</b>: Just send me a message here\n\
         2️⃣ <b>Inline Mode</b>: Type <code>@{u} your question</code> in any chat\n\n\
         Try inline mode by typing:\n\
         <code>@{u} What is AI?</code>",
        u = username
    )
}

pub fn help_text(username: &str) -> String {
    format!(
        "📖 <b>How to use this bot:</b>\n\n\
         <b>Direct Messages:</b>\n\
         Simply send any message and I'll respond using AI.\n\n\
         <b>Inline Mode:</b>\n\
         1. Type <code>@{u}</code> in any chat\n\
         2. Add your question after the bot username\n\
         3. Select the result to send\n\n\
         <b>Example:</b>\n\
         <code>@{u} Explain quantum computing</code>\n\n\
         <b>Commands:</b>\n{commands}",
        u = username,
        commands = html::escape(&Command::descriptions().to_string())
    )
}

pub fn models_text(username: &str) -> String {
    let mut text = String::from("🤖 <b>Available AI Models:</b>\n\n");
    for (i, (id, label)) in KNOWN_MODELS.iter().enumerate() {
        text.push_str(&format!("{}. <code>{}</code> - {}\n", i + 1, id, label));
    }
    text.push_str(&format!(
        "\nTo use a specific model in inline mode:\n\
         <code>@{} [model:openai/gpt-3.5-turbo] your question</code>",
        username
    ));
    text
}

/// Break `text` into pieces of at most `max_len` bytes, cutting after a
/// newline or else a space when one is available. Never cuts inside a char.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_len {
        let mut limit = max_len;
        while limit > 0 && !rest.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            // First char is wider than max_len; emit it alone.
            limit = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        let head = &rest[..limit];
        let cut = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }

    chunks
}

/// Routing table: commands, then private text, then inline queries.
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    let commands = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let private_text = dptree::filter(|msg: Message, me: Me| {
        route_message(msg.text(), msg.chat.is_private(), me.username()) == Route::Relay
    })
    .endpoint(handle_private_message);

    let messages = Update::filter_message()
        .branch(commands)
        .branch(private_text);

    let inline = Update::filter_inline_query().endpoint(handle_inline_query);

    dptree::entry().branch(messages).branch(inline)
}

/// Start the Telegram bot
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let bot = Bot::new(&state.config.telegram.bot_token);

    let telegram = &state.config.telegram;
    if telegram.api_id.is_some() || telegram.api_hash.is_some() {
        info!("TELEGRAM_API_ID/TELEGRAM_API_HASH are set but the Bot API does not use them");
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }

    info!("Starting Telegram bot...");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, me: Me) -> ResponseResult<()> {
    let username = me.username();
    let text = match cmd {
        Command::Start => start_text(username),
        Command::Help => help_text(username),
        Command::Models => models_text(username),
    };

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn handle_private_message(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    match msg.from.as_ref() {
        Some(user) => info!(
            "Telegram message from {} ({}): {}",
            user.first_name, user.id, text
        ),
        None => info!("Telegram message in chat {}: {}", msg.chat.id, text),
    }

    bot.send_chat_action(msg.chat.id, ChatAction::Typing)
        .await
        .ok();

    let response = private_reply(state.llm.as_ref(), text, state.default_model()).await;

    for chunk in split_message(&response, MAX_CHUNK_LEN) {
        bot.send_message(msg.chat.id, chunk).await?;
    }

    Ok(())
}

async fn handle_inline_query(
    bot: Bot,
    q: InlineQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    info!("Inline query from {} ({}): {}", q.from.first_name, q.from.id, q.query);

    let results = inline_results(state.llm.as_ref(), &q.query, state.default_model()).await;

    bot.answer_inline_query(q.id, results)
        .cache_time(INLINE_CACHE_SECS)
        .await?;
    Ok(())
}
