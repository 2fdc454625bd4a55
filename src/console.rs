//! Line-oriented command front end.
//!
//! Maps text commands read from stdin to [`SubscriptionsService`] calls.
//! Adding a command is one [`Command`] variant, one arm in
//! [`parse_command`] and one arm in [`handle`].

use chrono::NaiveDate;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WatchError;
use crate::service::SubscriptionsService;
use crate::subscription::{SessionTokens, SlotQuery, SubscriberId, Subscription, SubscriptionId};

pub const HELP: &str = "\
Commands:
  subscribe <subscriber> <url>          watch a listing page or RSS feed
  subscribe_slots <subscriber> <yyyy-mm-dd> <yyyy-mm-dd> <office_id> <tokens_json>
                                        watch free slots; tokens_json holds
                                        identity, csrf, csrf_header, webchsid2
  subscriptions <subscriber>            list subscriptions
  unsubscribe <subscriber> <id>         cancel a subscription
  help                                  show this text
  quit                                  stop everything and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe { subscriber: SubscriberId, url: String },
    SubscribeSlots { subscriber: SubscriberId, query: SlotQuery },
    List { subscriber: SubscriberId },
    Unsubscribe { subscriber: SubscriberId, id: SubscriptionId },
    Help,
    Quit,
}

/// Parse one input line.  Errors are messages meant for the user.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match name {
        "subscribe" => {
            let (subscriber, url) = split_subscriber(rest)?;
            if url.is_empty() {
                return Err("a listing URL is required".into());
            }
            Ok(Command::Subscribe {
                subscriber,
                url: url.to_string(),
            })
        }
        "subscribe_slots" => {
            let args: Vec<&str> = rest.splitn(5, char::is_whitespace).collect();
            let [subscriber, start, end, office_id, tokens] = args[..] else {
                return Err("usage: subscribe_slots <subscriber> <start> <end> <office_id> <tokens_json>".into());
            };
            let subscriber = parse_subscriber(subscriber)?;
            let date_start = parse_date(start)?;
            let date_end = parse_date(end)?;
            let session: SessionTokens =
                serde_json::from_str(tokens.trim()).map_err(|e| format!("invalid tokens: {e}"))?;
            Ok(Command::SubscribeSlots {
                subscriber,
                query: SlotQuery {
                    office_id: office_id.to_string(),
                    date_start,
                    date_end,
                    session,
                },
            })
        }
        "subscriptions" => Ok(Command::List {
            subscriber: parse_subscriber(rest)?,
        }),
        "unsubscribe" => {
            let (subscriber, id) = split_subscriber(rest)?;
            if id.is_empty() {
                return Err("a subscription id is required".into());
            }
            Ok(Command::Unsubscribe {
                subscriber,
                id: SubscriptionId::from(id),
            })
        }
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "" => Err("empty command".into()),
        other => Err(format!("unknown command {other:?}, try `help`")),
    }
}

fn split_subscriber(rest: &str) -> Result<(SubscriberId, &str), String> {
    let (subscriber, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    Ok((parse_subscriber(subscriber)?, tail.trim()))
}

fn parse_subscriber(raw: &str) -> Result<SubscriberId, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("invalid subscriber id {raw:?}"))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| format!("invalid date {raw:?}, expected yyyy-mm-dd"))
}

/// Execute a command and produce the reply text.
pub async fn handle(service: &SubscriptionsService, command: Command) -> String {
    match command {
        Command::Subscribe { subscriber, url } => create(service, Subscription::listing(subscriber, url)).await,
        Command::SubscribeSlots { subscriber, query } => create(service, Subscription::slots(subscriber, query)).await,
        Command::List { subscriber } => match service.list(subscriber).await {
            Ok(subs) if subs.is_empty() => "You have no subscriptions yet".to_string(),
            Ok(subs) => subs.iter().map(Subscription::describe).collect::<Vec<_>>().join("\n"),
            Err(e) => format!("Could not load subscriptions: {e}"),
        },
        Command::Unsubscribe { subscriber, id } => {
            let subs = match service.list(subscriber).await {
                Ok(subs) => subs,
                Err(e) => return format!("Could not load subscriptions: {e}"),
            };
            let Some(sub) = subs.into_iter().find(|s| s.id == id) else {
                return format!("Subscription {id} not found");
            };
            match service.drop(&sub).await {
                Ok(latest) => {
                    let latest = latest.unwrap_or(sub);
                    let mut reply = format!("{} removed", latest.describe());
                    if let Some(session) = latest.session_id() {
                        reply.push_str(&format!("\nCurrent session id: {session}"));
                    }
                    reply
                }
                Err(e) => format!("Could not remove subscription {id}: {e}"),
            }
        }
        Command::Help => HELP.to_string(),
        Command::Quit => "Bye".to_string(),
    }
}

async fn create(service: &SubscriptionsService, sub: Subscription) -> String {
    match service.add(sub).await {
        Ok(sub) => format!("{} created", sub.describe()),
        Err(WatchError::Fetch(e)) => format!(
            "Could not read the source ({e}). Is the link correct and do the session tokens still work?"
        ),
        Err(e) => format!("Could not create subscription: {e}"),
    }
}

/// Read commands until `quit` or end of input, writing one reply per line.
pub async fn run<R, W>(service: &SubscriptionsService, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (reply, quit) = match parse_command(&line) {
            Ok(Command::Quit) => (handle(service, Command::Quit).await, true),
            Ok(command) => (handle(service, command).await, false),
            Err(e) => (e, false),
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        if quit {
            break;
        }
    }
    Ok(())
}
